use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::BytesMut;

use common::err::{TbrError, TbrResult};

use crate::{MAX_PACKET_PAYLOAD, PACKET_HEADER_SIZE};

/// Framed packet transport over one TCP connection.
///
/// Every packet is prefixed by `u24 payload_length + u8 sequence`.
/// Payloads of 0xFFFFFF bytes continue in the next frame;
/// `read_packet` concatenates the continuation frames and `write_packet`
/// splits oversized payloads the same way.
#[derive(Debug)]
pub struct PacketChannel {
    stream: TcpStream,
    /// Reused across packets to avoid a fresh allocation per event.
    buffer: BytesMut,
}

/// Clone of the underlying socket used to interrupt a blocking read
/// from another thread.
#[derive(Debug)]
pub struct ChannelCloser {
    stream: TcpStream,
}

impl ChannelCloser {
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl PacketChannel {
    pub fn connect(host: &str, port: u16, read_timeout: Option<Duration>) -> TbrResult<Self> {
        let address = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&address)
            .map_err(|e| TbrError::ConnectionError(format!("Connect to {} failed: {}", address, e)))?;
        stream.set_read_timeout(read_timeout)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buffer: BytesMut::new(),
        })
    }

    pub fn closer(&self) -> TbrResult<ChannelCloser> {
        Ok(ChannelCloser {
            stream: self.stream.try_clone()?,
        })
    }

    /// Read one complete packet, following continuation frames. Returns
    /// the payload and the sequence number of the last frame.
    pub fn read_packet(&mut self) -> TbrResult<(Vec<u8>, u8)> {
        self.buffer.clear();
        let mut seq_num;

        loop {
            let mut header = [0u8; PACKET_HEADER_SIZE];
            self.stream.read_exact(&mut header)?;
            let packet_size = (&header[0..3]).read_u24::<LittleEndian>()? as usize;
            seq_num = header[3];

            let start = self.buffer.len();
            self.buffer.resize(start + packet_size, 0);
            self.stream.read_exact(&mut self.buffer[start..])?;

            if packet_size < MAX_PACKET_PAYLOAD {
                break;
            }
        }

        Ok((self.buffer.to_vec(), seq_num))
    }

    /// Write one payload, splitting into continuation frames when it
    /// exceeds the frame limit. The sequence number increments per
    /// frame, wrapping at 256.
    pub fn write_packet(&mut self, packet: &[u8], seq_num: u8) -> TbrResult<()> {
        let mut seq = seq_num;
        let mut chunks = packet.chunks(MAX_PACKET_PAYLOAD).peekable();

        // a zero length payload still travels as one empty frame
        if packet.is_empty() {
            return self.write_frame(&[], seq);
        }

        let mut last_len = 0;
        while let Some(chunk) = chunks.next() {
            self.write_frame(chunk, seq)?;
            seq = seq.wrapping_add(1);
            last_len = chunk.len();
        }
        // an exact multiple of the frame limit needs an empty trailer so
        // the peer knows the packet ended
        if last_len == MAX_PACKET_PAYLOAD {
            self.write_frame(&[], seq)?;
        }
        Ok(())
    }

    fn write_frame(&mut self, chunk: &[u8], seq: u8) -> TbrResult<()> {
        self.stream.write_u24::<LittleEndian>(chunk.len() as u32)?;
        self.stream.write_u8(seq)?;
        self.stream.write_all(chunk)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Run a one-shot server; returns what the client wrote after
    /// sending `to_send` to it.
    fn with_server(
        to_send: Vec<u8>,
        client: impl FnOnce(&mut PacketChannel) -> Vec<u8>,
    ) -> Vec<u8> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(&to_send).unwrap();
            let mut received = Vec::new();
            let _ = stream.read_to_end(&mut received);
            received
        });

        let mut channel = PacketChannel::connect("127.0.0.1", addr.port(), None).unwrap();
        let _ = client(&mut channel);
        channel.shutdown();
        server.join().unwrap()
    }

    fn frame(payload: &[u8], seq: u8) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        out.push(seq);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn read_single_packet() {
        with_server(frame(b"hello", 3), |channel| {
            let (payload, seq) = channel.read_packet().unwrap();
            assert_eq!(payload, b"hello");
            assert_eq!(seq, 3);
            Vec::new()
        });
    }

    #[test]
    fn read_concatenates_continuation_frames() {
        // 0xFFFFFF full frame followed by a 3 byte trailer
        let big = vec![0xabu8; MAX_PACKET_PAYLOAD];
        let mut wire = frame(&big, 0);
        wire.extend_from_slice(&frame(b"end", 1));

        with_server(wire, |channel| {
            let (payload, seq) = channel.read_packet().unwrap();
            assert_eq!(payload.len(), MAX_PACKET_PAYLOAD + 3);
            assert_eq!(&payload[MAX_PACKET_PAYLOAD..], b"end");
            assert_eq!(seq, 1);
            Vec::new()
        });
    }

    #[test]
    fn write_prefixes_header() {
        let received = with_server(Vec::new(), |channel| {
            channel.write_packet(b"ping", 7).unwrap();
            Vec::new()
        });
        assert_eq!(received, frame(b"ping", 7));
    }

    #[test]
    fn closed_socket_reports_incomplete() {
        let result = with_server(frame(b"x", 0), |channel| {
            let _ = channel.read_packet().unwrap();
            // the server closes after one frame; the next read fails
            assert!(channel.read_packet().is_err());
            Vec::new()
        });
        assert!(result.is_empty());
    }
}
