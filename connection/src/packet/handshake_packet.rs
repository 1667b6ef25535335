use common::err::{Needed, TbrError, TbrResult};

use binlog::gtid::ServerType;

/// Initial handshake sent by the server.
///
/// Layout: protocol_version u8, server_version NUL string, thread_id
/// u32, first 8 scramble bytes, one filler byte, capabilities_lo u16,
/// collation u8, status u16, 13 filler bytes, 13 more scramble bytes
/// (12 used + NUL), optional extension ignored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub server_capabilities: u16,
    pub server_collation: u8,
    pub status_flags: u16,
    /// Full 20 byte mysql_native_password scramble.
    pub scramble: Vec<u8>,
}

impl HandshakePacket {
    pub fn parse(packet: &[u8]) -> TbrResult<HandshakePacket> {
        let protocol_version = *packet
            .first()
            .ok_or(TbrError::Incomplete(Needed::NoEnoughData))?;

        let rest = &packet[1..];
        let version_end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| TbrError::ProtocolViolation("Unterminated server version".to_string()))?;
        let server_version = String::from_utf8_lossy(&rest[..version_end]).to_string();
        let rest = &rest[version_end + 1..];

        // thread_id(4) + scramble1(8) + filler(1) + caps(2) + collation(1)
        // + status(2) + filler2(13) + scramble2(13)
        if rest.len() < 44 {
            return Err(TbrError::Incomplete(Needed::NoEnoughData));
        }
        let thread_id = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let scramble1 = &rest[4..12];
        let server_capabilities = u16::from_le_bytes([rest[13], rest[14]]);
        let server_collation = rest[15];
        let status_flags = u16::from_le_bytes([rest[16], rest[17]]);
        // rest[18..31] is filler holding 4.1+ extensions we do not use
        let scramble2 = &rest[31..43];

        let mut scramble = Vec::with_capacity(20);
        scramble.extend_from_slice(scramble1);
        scramble.extend_from_slice(scramble2);

        Ok(HandshakePacket {
            protocol_version,
            server_version,
            thread_id,
            server_capabilities,
            server_collation,
            status_flags,
            scramble,
        })
    }

    /// MariaDB or MySQL, from the version string.
    pub fn server_type(&self) -> ServerType {
        ServerType::from_server_version(&self.server_version)
    }
}
