use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use common::err::{TbrError, TbrResult};
use common::queue::BoundedQueue;

use binlog::events::checksum_type::{verify_and_strip_crc32, ChecksumType};
use binlog::events::event::Event;
use binlog::events::event_header::Header;
use binlog::events::protocol::incident_event::{IncidentEvent, INCIDENT_LOST_EVENTS};

use connection::conn::packet_channel::{ChannelCloser, PacketChannel};
use connection::packet::error_packet::ErrorPacket;
use connection::packet::response_type::ResponseType;

/// Capacity of the buffer between the socket reader and event dispatch.
/// Small on purpose: the reader blocks when the listener falls behind,
/// which is the back pressure the stream needs.
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Owns the dump stream socket after the dump command was issued.
///
/// A dedicated reader thread frames packets, strips the event marker and
/// checksum, decodes, and pushes complete events into a bounded queue.
/// Any I/O failure turns into a synthetic Incident event (code 175,
/// carrying the last known offset) followed by end of stream, so that
/// consistency state is never silently frozen.
#[derive(Debug)]
pub struct BinlogDriver {
    queue: Arc<BoundedQueue<Event>>,
    closer: ChannelCloser,
    reader: Option<JoinHandle<()>>,
}

impl BinlogDriver {
    pub fn start(channel: PacketChannel, checksum: ChecksumType) -> TbrResult<BinlogDriver> {
        let closer = channel.closer()?;
        let queue = Arc::new(BoundedQueue::new(EVENT_QUEUE_CAPACITY));

        let reader_queue = queue.clone();
        let reader = thread::Builder::new()
            .name("tbr-binlog-reader".to_string())
            .spawn(move || reader_loop(channel, checksum, reader_queue))?;

        Ok(BinlogDriver {
            queue,
            closer,
            reader: Some(reader),
        })
    }

    /// Next event in wire order. None means the stream ended (EOF,
    /// error after the synthetic incident, or shutdown).
    pub fn wait_for_next_event(&self) -> Option<Event> {
        self.queue.pop()
    }

    /// Interrupt the blocking read and end the stream. Idempotent.
    pub fn shutdown(&mut self) {
        self.closer.close();
        self.queue.close();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for BinlogDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reader_loop(mut channel: PacketChannel, checksum: ChecksumType, queue: Arc<BoundedQueue<Event>>) {
    let last_offset = AtomicU64::new(0);

    loop {
        let (packet, _) = match channel.read_packet() {
            Ok(p) => p,
            Err(err) => {
                push_incident(
                    &queue,
                    &format!("Read error: {}", err),
                    last_offset.load(Ordering::Relaxed),
                );
                break;
            }
        };

        match packet.first() {
            Some(&ResponseType::OK) => {
                if !handle_event_packet(&packet[1..], checksum, &queue, &last_offset) {
                    break;
                }
            }
            Some(&ResponseType::END_OF_FILE) => {
                info!("Binlog stream reached end of file");
                break;
            }
            Some(&ResponseType::ERROR) => {
                let message = match ErrorPacket::parse(&packet[1..]) {
                    Ok(err) => format!("Server error {}: {}", err.error_code, err.message),
                    Err(_) => "Unparsable server error packet".to_string(),
                };
                push_incident(&queue, &message, last_offset.load(Ordering::Relaxed));
                break;
            }
            Some(other) => {
                debug!("Skipping packet with unexpected first byte 0x{:02x}", other);
            }
            None => {}
        }
    }

    queue.close();
}

/// Decode one event packet. Returns false when streaming must stop.
fn handle_event_packet(
    raw: &[u8],
    checksum: ChecksumType,
    queue: &Arc<BoundedQueue<Event>>,
    last_offset: &AtomicU64,
) -> bool {
    let stripped: &[u8] = match checksum {
        ChecksumType::None => raw,
        ChecksumType::Crc32 => match verify_and_strip_crc32(raw) {
            Some(body) => body,
            None => {
                push_incident(
                    queue,
                    "Event checksum mismatch, refusing to stream",
                    last_offset.load(Ordering::Relaxed),
                );
                return false;
            }
        },
    };

    match Event::decode(stripped) {
        Ok(event) => {
            // a format description announcing CRC32 on a stream we read
            // unchecked means the negotiation went wrong
            if let Event::FormatDescription(fde) = &event {
                if checksum == ChecksumType::None && fde.checksum == Some(ChecksumType::Crc32) {
                    push_incident(
                        queue,
                        "Master streams CRC32 checksums but none were negotiated, refusing to stream",
                        last_offset.load(Ordering::Relaxed),
                    );
                    return false;
                }
            }

            if event.header().next_position > 0 {
                last_offset.store(event.header().next_position as u64, Ordering::Relaxed);
            }
            queue.push(event)
        }
        Err(TbrError::MalformedEvent(message)) => {
            // report as Unknown and keep streaming
            warn!("Malformed event: {}", message);
            match Header::parse(stripped) {
                Ok((payload, header)) => queue.push(Event::unknown(header, payload)),
                Err(_) => {
                    push_incident(
                        queue,
                        "Unparsable event header",
                        last_offset.load(Ordering::Relaxed),
                    );
                    false
                }
            }
        }
        Err(err) => {
            push_incident(
                queue,
                &format!("Event decode failed: {}", err),
                last_offset.load(Ordering::Relaxed),
            );
            false
        }
    }
}

fn push_incident(queue: &Arc<BoundedQueue<Event>>, message: &str, pos: u64) {
    warn!("Binlog stream incident at {}: {}", pos, message);
    let incident = IncidentEvent::synthetic(INCIDENT_LOST_EVENTS, message, pos);
    queue.push(Event::Incident(incident));
}
