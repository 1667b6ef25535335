use tracing::debug;

use common::err::{TbrError, TbrResult};

use binlog::events::checksum_type::ChecksumType;
use binlog::gtid::{Gtid, ServerType};

use crate::commands::authenticate_command::AuthenticateCommand;
use crate::commands::dump_binlog_command::DumpBinlogCommand;
use crate::commands::dump_binlog_gtid_command::DumpBinlogGtidCommand;
use crate::commands::query_command::QueryCommand;
use crate::commands::register_slave_command::RegisterSlaveCommand;
use crate::conn::connection_options::ConnectionOptions;
use crate::conn::packet_channel::{ChannelCloser, PacketChannel};
use crate::packet::check_error_packet;
use crate::packet::end_of_file_packet::is_eof_packet;
use crate::packet::handshake_packet::HandshakePacket;
use crate::packet::response_type::ResponseType;
use crate::packet::result_set_row_packet::ResultSetRowPacket;

/// SHOW MASTER STATUS: |File|Position|Binlog_Do_DB|...|
const MASTER_STATUS_FILE_INDEX: usize = 0;
const MASTER_STATUS_POSITION_INDEX: usize = 1;

/// SHOW BINARY LOGS: |Log_name|File_size|...|
const BINARY_LOGS_NAME_INDEX: usize = 0;
const BINARY_LOGS_SIZE_INDEX: usize = 1;

/// One authenticated client connection to a MariaDB/MySQL server.
///
/// Speaks protocol 4.1 with mysql_native_password only. Used both for
/// command traffic (SET, SHOW, metadata reads/writes) and as the front
/// half of a replication session: after `dump_binlog*` the channel is
/// handed over to the streaming driver via `into_channel`.
#[derive(Debug)]
pub struct Connection {
    pub options: ConnectionOptions,

    channel: Option<PacketChannel>,

    server_type: ServerType,
    server_version: String,
}

impl Connection {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            channel: None,
            server_type: ServerType::Unknown,
            server_version: String::new(),
        }
    }

    /// Connect and authenticate. On return the server flavor has been
    /// classified from the handshake version string.
    pub fn connect(&mut self) -> TbrResult<()> {
        if self.channel.is_some() {
            return Ok(());
        }

        let mut channel = PacketChannel::connect(
            &self.options.hostname,
            self.options.port,
            self.options.read_timeout,
        )?;

        let (packet, seq_num) = channel.read_packet()?;
        check_error_packet(&packet, "Initial handshake")
            .map_err(|e| TbrError::AuthenticationFailed(e.to_string()))?;
        let handshake = HandshakePacket::parse(&packet)?;

        if handshake.protocol_version != 10 {
            return Err(TbrError::ProtocolViolation(format!(
                "Unsupported protocol version {}",
                handshake.protocol_version
            )));
        }

        self.server_type = handshake.server_type();
        self.server_version = handshake.server_version.clone();

        let auth = AuthenticateCommand::new(
            &self.options.username,
            &self.options.password,
            &self.options.database,
            handshake.server_collation,
            &handshake.scramble,
        );
        channel.write_packet(&auth.serialize()?, seq_num.wrapping_add(1))?;

        let (packet, _) = channel.read_packet()?;
        if packet.first() != Some(&ResponseType::OK) {
            check_error_packet(&packet, "Authentication")
                .map_err(|e| TbrError::AuthenticationFailed(e.to_string()))?;
            // auth plugin switches are not spoken here
            return Err(TbrError::AuthenticationFailed(format!(
                "Unexpected authentication response 0x{:02x?}",
                packet.first()
            )));
        }

        debug!(
            "Connected to {}:{} ({} {})",
            self.options.hostname,
            self.options.port,
            self.server_type.name(),
            self.server_version
        );

        self.channel = Some(channel);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn closer(&self) -> TbrResult<ChannelCloser> {
        self.channel_ref()?.closer()
    }

    pub fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.shutdown();
        }
    }

    /// Hand the socket over to the streaming driver.
    pub fn into_channel(mut self) -> TbrResult<PacketChannel> {
        self.channel
            .take()
            .ok_or_else(|| TbrError::ConnectionError("Not connected".to_string()))
    }

    fn channel_ref(&self) -> TbrResult<&PacketChannel> {
        self.channel
            .as_ref()
            .ok_or_else(|| TbrError::ConnectionError("Not connected".to_string()))
    }

    fn channel_mut(&mut self) -> TbrResult<&mut PacketChannel> {
        self.channel
            .as_mut()
            .ok_or_else(|| TbrError::ConnectionError("Not connected".to_string()))
    }

    /// Run a statement that returns OK (SET and friends).
    pub fn execute(&mut self, sql: &str, context: &str) -> TbrResult<()> {
        let command = QueryCommand::new(sql);
        let channel = self.channel_mut()?;
        channel.write_packet(&command.serialize()?, 0)?;

        let (packet, _) = channel.read_packet()?;
        check_error_packet(&packet, context)?;
        if packet.first() != Some(&ResponseType::OK) {
            return Err(TbrError::ProtocolViolation(format!(
                "{}: expected OK, first byte 0x{:02x?}",
                context,
                packet.first()
            )));
        }
        Ok(())
    }

    /// Run a statement and collect its text protocol result rows.
    pub fn query(&mut self, sql: &str) -> TbrResult<Vec<Vec<Option<String>>>> {
        let command = QueryCommand::new(sql);
        let channel = self.channel_mut()?;
        channel.write_packet(&command.serialize()?, 0)?;

        let (packet, _) = channel.read_packet()?;
        check_error_packet(&packet, "Reading result set")?;
        if packet.first() == Some(&ResponseType::OK) {
            return Ok(Vec::new());
        }

        // skip through the column definitions
        loop {
            let (packet, _) = channel.read_packet()?;
            check_error_packet(&packet, "Reading result set metadata")?;
            if is_eof_packet(&packet) {
                break;
            }
        }

        let mut rows = Vec::new();
        loop {
            let (packet, _) = channel.read_packet()?;
            check_error_packet(&packet, "Reading result set rows")?;
            if is_eof_packet(&packet) {
                break;
            }
            rows.push(ResultSetRowPacket::parse(&packet)?.cells);
        }
        Ok(rows)
    }

    /// `SHOW MASTER STATUS` for the bootstrap file + offset.
    pub fn fetch_master_status(&mut self) -> TbrResult<(String, u64)> {
        let rows = self.query("SHOW MASTER STATUS")?;
        let row = rows.first().ok_or_else(|| {
            TbrError::CommandFailed("Could not read master binlog position".to_string())
        })?;

        let file = row
            .get(MASTER_STATUS_FILE_INDEX)
            .cloned()
            .flatten()
            .ok_or_else(|| TbrError::CommandFailed("SHOW MASTER STATUS: no file".to_string()))?;
        let position = row
            .get(MASTER_STATUS_POSITION_INDEX)
            .cloned()
            .flatten()
            .ok_or_else(|| TbrError::CommandFailed("SHOW MASTER STATUS: no position".to_string()))?;

        Ok((file, position.parse()?))
    }

    /// `SHOW BINARY LOGS` as (file, size) pairs, used to validate
    /// repositioning requests.
    pub fn fetch_binary_logs(&mut self) -> TbrResult<Vec<(String, u64)>> {
        let rows = self.query("SHOW BINARY LOGS")?;
        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row
                .get(BINARY_LOGS_NAME_INDEX)
                .cloned()
                .flatten()
                .ok_or_else(|| TbrError::CommandFailed("SHOW BINARY LOGS: no name".to_string()))?;
            let size = row
                .get(BINARY_LOGS_SIZE_INDEX)
                .cloned()
                .flatten()
                .ok_or_else(|| TbrError::CommandFailed("SHOW BINARY LOGS: no size".to_string()))?;
            logs.push((name, size.parse()?));
        }
        Ok(logs)
    }

    /// MariaDB prelude: announce GTID capable slave.
    pub fn set_mariadb_slave_capability(&mut self) -> TbrResult<()> {
        self.execute(
            "SET @mariadb_slave_capability=4",
            "Setting mariadb_slave_capability",
        )
    }

    /// MariaDB prelude: GTID start position for the coming dump.
    pub fn set_slave_connect_state(&mut self, gtid: &Gtid) -> TbrResult<()> {
        let sql = format!("SET @slave_connect_state='{}'", gtid.string());
        self.execute(&sql, "Setting slave_connect_state")
    }

    /// Tell the master we understand its checksum setting, then read the
    /// setting back so the stream reader knows whether events carry a
    /// trailing CRC32.
    pub fn set_master_binlog_checksum(&mut self) -> TbrResult<ChecksumType> {
        self.execute(
            "SET @master_binlog_checksum= @@global.binlog_checksum",
            "Setting master_binlog_checksum",
        )?;

        let rows = self.query("SELECT @master_binlog_checksum")?;
        let value = rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .flatten()
            .unwrap_or_default();
        Ok(ChecksumType::from_name(&value))
    }

    pub fn register_slave(&mut self) -> TbrResult<()> {
        let command = RegisterSlaveCommand::new(
            self.options.slave_server_id,
            &self.options.hostname,
            &self.options.username,
            &self.options.password,
            self.options.port,
        );
        let channel = self.channel_mut()?;
        channel.write_packet(&command.serialize()?, 0)?;

        let (packet, _) = channel.read_packet()?;
        check_error_packet(&packet, "Slave registration")?;
        debug!("Registered as slave with server_id {}", self.options.slave_server_id);
        Ok(())
    }

    /// Issue COM_BINLOG_DUMP. No reply is read here; the stream follows.
    pub fn dump_binlog(&mut self, file: &str, offset: u64) -> TbrResult<()> {
        let command = DumpBinlogCommand::new(self.options.slave_server_id, file.to_string(), offset);
        let channel = self.channel_mut()?;
        channel.write_packet(&command.serialize()?, 0)?;
        debug!("Sent COM_BINLOG_DUMP for {}:{}", file, offset);
        Ok(())
    }

    /// Issue COM_BINLOG_DUMP_GTID (MySQL only).
    pub fn dump_binlog_gtid(&mut self, gtid: &Gtid) -> TbrResult<()> {
        if gtid.server_type() != ServerType::MySql {
            return Err(TbrError::Config(
                "COM_BINLOG_DUMP_GTID requires a MySQL dialect gtid".to_string(),
            ));
        }
        let command = DumpBinlogGtidCommand::new(self.options.slave_server_id, gtid.clone());
        let channel = self.channel_mut()?;
        channel.write_packet(&command.serialize()?, 0)?;
        debug!("Sent COM_BINLOG_DUMP_GTID from {}", gtid.string());
        Ok(())
    }
}
