use common::err::{Needed, TbrError, TbrResult};

use crate::packet::response_type::ResponseType;

/// EOF packet: warnings u16, status u16. Distinguished from a lenenc
/// 0xFE length marker by its size: a real EOF packet is shorter than 9
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndOfFilePacket {
    pub warning_count: u16,
    pub status_flags: u16,
}

impl EndOfFilePacket {
    pub fn parse(body: &[u8]) -> TbrResult<EndOfFilePacket> {
        if body.len() < 4 {
            return Err(TbrError::Incomplete(Needed::NoEnoughData));
        }
        Ok(EndOfFilePacket {
            warning_count: u16::from_le_bytes([body[0], body[1]]),
            status_flags: u16::from_le_bytes([body[2], body[3]]),
        })
    }
}

/// EOF check for result set framing.
pub fn is_eof_packet(packet: &[u8]) -> bool {
    packet.first() == Some(&ResponseType::END_OF_FILE) && packet.len() < 9
}
