use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info};

use common::config::{ListenerSpec, ServerUri, StartPosition};
use common::err::{TbrError, TbrResult};

use binlog::events::event::Event;
use binlog::events::protocol::incident_event::INCIDENT_LOST_EVENTS;
use binlog::gtid::{Gtid, ServerType};

use connection::conn::connection::Connection;
use connection::conn::connection_options::ConnectionOptions;
use connection::conn::packet_channel::ChannelCloser;

use crate::driver::BinlogDriver;
use crate::handlers::RegistryUpdateHandler;
use crate::pipeline::{HandlerPipeline, InjectionQueue};
use crate::registry::{ConsistencyRegistry, CursorBoard, ServerCursor};

/// SHOW VARIABLES: |Variable_name|Value|
const SHOW_VARIABLES_VALUE_INDEX: usize = 1;

/// Validation connections should not hang forever.
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Cross-thread control surface of one listener.
#[derive(Debug, Default)]
pub struct ListenerHandle {
    shutdown: AtomicBool,
    reposition: Mutex<Option<StartPosition>>,
    closer: Mutex<Option<ChannelCloser>>,
    /// Binlog file the session is currently reading, maintained across
    /// rotates so offset-only repositioning knows its file.
    current_file: Mutex<String>,
}

impl ListenerHandle {
    fn close_socket(&self) {
        if let Some(closer) = &*self.closer.lock().unwrap() {
            closer.close();
        }
    }

    fn set_closer(&self, closer: Option<ChannelCloser>) {
        *self.closer.lock().unwrap() = closer;
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.close_socket();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn request_reposition(&self, start: StartPosition) {
        *self.reposition.lock().unwrap() = Some(start);
        self.close_socket();
    }

    fn take_reposition(&self) -> Option<StartPosition> {
        self.reposition.lock().unwrap().take()
    }

    fn set_current_file(&self, file: &str) {
        *self.current_file.lock().unwrap() = file.to_string();
    }

    pub fn current_file(&self) -> String {
        self.current_file.lock().unwrap().clone()
    }
}

/// External control of a running listener: repositioning and shutdown.
/// Repositioning validates the new coordinates on a temporary
/// connection first; the running session is only disturbed once the new
/// position is known to exist.
#[derive(Debug, Clone)]
pub struct ListenerController {
    options: ConnectionOptions,
    handle: Arc<ListenerHandle>,
}

impl ListenerController {
    pub fn set_position(&self, file: &str, offset: u64) -> TbrResult<()> {
        let mut conn = self.validation_connection()?;
        let logs = conn.fetch_binary_logs()?;
        conn.disconnect();

        let size = logs
            .iter()
            .find(|(name, _)| name == file)
            .map(|(_, size)| *size)
            .ok_or_else(|| {
                TbrError::OutOfRange(format!("Binlog file {} is not on the server", file))
            })?;
        if offset > size {
            return Err(TbrError::OutOfRange(format!(
                "Offset {} is past the end of {} (size {})",
                offset, file, size
            )));
        }

        self.handle.request_reposition(StartPosition::FileOffset {
            file: file.to_string(),
            offset,
        });
        Ok(())
    }

    /// Reposition within the file the session currently reads.
    pub fn set_position_offset(&self, offset: u64) -> TbrResult<()> {
        let file = self.handle.current_file();
        if file.is_empty() {
            return Err(TbrError::OutOfRange(
                "No current binlog file to reposition in".to_string(),
            ));
        }
        self.set_position(&file, offset)
    }

    pub fn set_position_gtid(&self, gtid: &Gtid) -> TbrResult<()> {
        // validate credentials and dialect, then cancel and reconnect
        let mut conn = self.validation_connection()?;
        let server_type = conn.server_type();
        conn.disconnect();

        if gtid.server_type() != server_type {
            return Err(TbrError::Config(format!(
                "Cannot position a {} server with a {} gtid",
                server_type.name(),
                gtid.server_type().name()
            )));
        }

        let start = match server_type {
            ServerType::MariaDb => StartPosition::MariaGtid(gtid.string()),
            _ => StartPosition::MySqlGtid(gtid.string()),
        };
        self.handle.request_reposition(start);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.handle.request_shutdown();
    }

    fn validation_connection(&self) -> TbrResult<Connection> {
        let mut options = self.options.clone();
        options.read_timeout = Some(VALIDATION_TIMEOUT);
        let mut conn = Connection::new(options);
        conn.connect()?;
        Ok(conn)
    }
}

enum SessionEnd {
    Shutdown,
    Reposition(StartPosition),
    /// Stream ended; Some carries the terminal incident message.
    Ended(Option<String>),
}

enum ResolvedStart {
    FileOffset { file: String, offset: u64 },
    Gtid(Gtid),
}

/// One replication listener: a long lived client that attaches to a
/// server as a replica, decodes its binlog stream, and drives the
/// content handler pipeline that keeps the consistency registry
/// current. Runs on its own thread; `run` returns when the stream ends,
/// a fatal error occurs, or shutdown is requested.
pub struct ReplicationListener {
    spec: ListenerSpec,
    options: ConnectionOptions,
    registry: Arc<ConsistencyRegistry>,
    cursors: Arc<CursorBoard>,
    handle: Arc<ListenerHandle>,
}

impl ReplicationListener {
    pub fn new(
        spec: ListenerSpec,
        slave_server_id: u32,
        registry: Arc<ConsistencyRegistry>,
        cursors: Arc<CursorBoard>,
    ) -> TbrResult<(Self, ListenerController)> {
        let uri = ServerUri::parse(&spec.uri)?;
        let options = ConnectionOptions::from_uri(&uri, slave_server_id);
        let handle = Arc::new(ListenerHandle::default());

        let controller = ListenerController {
            options: options.clone(),
            handle: handle.clone(),
        };
        let listener = ReplicationListener {
            spec,
            options,
            registry,
            cursors,
            handle,
        };
        Ok((listener, controller))
    }

    pub fn listener_id(&self) -> u32 {
        self.spec.listener_id
    }

    /// Session loop: connect, stream, and either exit or reconnect with
    /// new coordinates when repositioned.
    pub fn run(mut self) -> TbrResult<()> {
        let mut start = self.spec.start_position.clone();

        loop {
            if self.handle.is_shutdown() {
                return Ok(());
            }
            match self.run_session(&start)? {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::Reposition(next) => {
                    info!(
                        "Listener {} repositioning to {:?}",
                        self.spec.listener_id, next
                    );
                    start = next;
                }
                SessionEnd::Ended(None) => {
                    info!("Listener {} stream ended", self.spec.listener_id);
                    return Ok(());
                }
                SessionEnd::Ended(Some(message)) => {
                    return Err(TbrError::ConnectionError(message));
                }
            }
        }
    }

    fn run_session(&mut self, start: &StartPosition) -> TbrResult<SessionEnd> {
        let mut conn = Connection::new(self.options.clone());
        conn.connect()?;
        let server_type = conn.server_type();
        info!(
            "Listener {} connected to {} ({} {})",
            self.spec.listener_id,
            self.spec.uri,
            server_type.name(),
            conn.server_version()
        );

        let (resolved, master_server_id) = self.resolve_start(&mut conn, server_type, start)?;

        conn.register_slave()?;

        if server_type == ServerType::MariaDb {
            conn.set_mariadb_slave_capability()?;
            if let ResolvedStart::Gtid(gtid) = &resolved {
                conn.set_slave_connect_state(gtid)?;
            }
        }

        let checksum = conn.set_master_binlog_checksum()?;

        let mut cursor = ServerCursor {
            server_id: master_server_id,
            binlog_file: String::new(),
            binlog_pos: 4,
            gtid: Gtid::default(),
            gtid_known: false,
            server_type,
        };

        match &resolved {
            ResolvedStart::FileOffset { file, offset } => {
                conn.dump_binlog(file, *offset)?;
                cursor.binlog_file = file.clone();
                cursor.binlog_pos = *offset;
                self.handle.set_current_file(file);
            }
            ResolvedStart::Gtid(gtid) if server_type == ServerType::MariaDb => {
                // offset 4 and an empty name: the server positions on
                // @slave_connect_state
                conn.dump_binlog("", 4)?;
                cursor.gtid = gtid.clone();
                cursor.gtid_known = true;
            }
            ResolvedStart::Gtid(gtid) => {
                conn.dump_binlog_gtid(gtid)?;
                cursor.gtid = gtid.clone();
                cursor.gtid_known = true;
            }
        }

        let channel = conn.into_channel()?;
        self.handle.set_closer(Some(channel.closer()?));
        let mut driver = BinlogDriver::start(channel, checksum)?;

        let end = self.stream(&driver, server_type, cursor);

        self.handle.set_closer(None);
        driver.shutdown();
        Ok(end)
    }

    fn resolve_start(
        &self,
        conn: &mut Connection,
        server_type: ServerType,
        start: &StartPosition,
    ) -> TbrResult<(ResolvedStart, u32)> {
        match start {
            StartPosition::FileOffset { file, offset } => Ok((
                ResolvedStart::FileOffset {
                    file: file.clone(),
                    offset: *offset,
                },
                0,
            )),
            StartPosition::MariaGtid(text) => {
                if server_type != ServerType::MariaDb {
                    return Err(TbrError::Config(format!(
                        "MariaDB gtid start against a {} server",
                        server_type.name()
                    )));
                }
                Ok((ResolvedStart::Gtid(Gtid::parse_mariadb(text)?), 0))
            }
            StartPosition::MySqlGtid(text) => {
                if server_type != ServerType::MySql {
                    return Err(TbrError::Config(format!(
                        "MySQL gtid start against a {} server",
                        server_type.name()
                    )));
                }
                Ok((ResolvedStart::Gtid(Gtid::parse_mysql(text)?), 0))
            }
            StartPosition::FromMetadata => {
                let master_server_id = fetch_master_server_id(conn)?;

                if let Some(cursor) = self.cursors.get(master_server_id) {
                    if cursor.gtid_known && cursor.gtid.server_type() == server_type {
                        debug!(
                            "Resuming server {} from stored gtid {}",
                            master_server_id, cursor.gtid
                        );
                        return Ok((ResolvedStart::Gtid(cursor.gtid), master_server_id));
                    }
                }

                // nothing usable stored: bootstrap from the master
                let (file, offset) = conn.fetch_master_status()?;
                debug!(
                    "Bootstrapping server {} from master status {}:{}",
                    master_server_id, file, offset
                );
                Ok((ResolvedStart::FileOffset { file, offset }, master_server_id))
            }
        }
    }

    fn stream(
        &self,
        driver: &BinlogDriver,
        server_type: ServerType,
        mut cursor: ServerCursor,
    ) -> SessionEnd {
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(Box::new(RegistryUpdateHandler::new(
            self.registry.clone(),
            self.cursors.clone(),
            server_type,
        )));

        let mut injection = InjectionQueue::new();
        let mut failure: Option<String> = None;

        loop {
            if self.handle.is_shutdown() {
                return SessionEnd::Shutdown;
            }
            if let Some(next) = self.handle.take_reposition() {
                return SessionEnd::Reposition(next);
            }

            let event = match injection.pop_front() {
                Some(event) => event,
                None => match driver.wait_for_next_event() {
                    Some(event) => event,
                    None => {
                        // stream ended; a shutdown-triggered socket
                        // close is a clean exit
                        if self.handle.is_shutdown() {
                            return SessionEnd::Shutdown;
                        }
                        if let Some(next) = self.handle.take_reposition() {
                            return SessionEnd::Reposition(next);
                        }
                        return SessionEnd::Ended(failure);
                    }
                },
            };

            // cursor bookkeeping in wire order, ahead of the handlers:
            // a rotate resets the file, everything else advances the
            // offset
            match &event {
                Event::Rotate(rotate) => {
                    info!(
                        "Listener {} rotating to {}:{}",
                        self.spec.listener_id, rotate.binlog_file, rotate.binlog_pos
                    );
                    cursor.binlog_file = rotate.binlog_file.clone();
                    cursor.binlog_pos = rotate.binlog_pos;
                    self.handle.set_current_file(&rotate.binlog_file);
                }
                other => {
                    let next_position = other.header().next_position;
                    if next_position > 0 {
                        cursor.binlog_pos = next_position as u64;
                    }
                }
            }
            if cursor.server_id == 0 {
                cursor.server_id = event.header().server_id;
            }
            if cursor.server_id != 0 {
                // keep the published gtid, the registry handler owns it
                if let Some(published) = self.cursors.get(cursor.server_id) {
                    cursor.gtid = published.gtid;
                    cursor.gtid_known = published.gtid_known;
                }
                self.cursors.publish(cursor.clone());
            }

            let delivered = match pipeline.process(event, &mut injection) {
                Ok(delivered) => delivered,
                Err(err) => {
                    error!("Handler failed, skipping event: {}", err);
                    continue;
                }
            };

            // the listener is the final consumer; incidents mark the
            // session as failed before the stream closes
            if let Some(Event::Incident(incident)) = delivered {
                if incident.code == INCIDENT_LOST_EVENTS {
                    error!(
                        "Listener {} incident at {}: {}",
                        self.spec.listener_id, incident.header.next_position, incident.message
                    );
                    failure = Some(incident.message);
                }
            }
        }
    }
}

fn fetch_master_server_id(conn: &mut Connection) -> TbrResult<u32> {
    let rows = conn.query("SHOW VARIABLES LIKE 'server_id'")?;
    let value = rows
        .first()
        .and_then(|row| row.get(SHOW_VARIABLES_VALUE_INDEX))
        .cloned()
        .flatten()
        .ok_or_else(|| TbrError::CommandFailed("Could not read master server_id".to_string()))?;
    Ok(value.parse()?)
}
