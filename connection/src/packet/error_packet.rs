use common::err::{Needed, TbrError, TbrResult};

use crate::packet::response_type::ResponseType;

/// ERR packet: error_code u16, `#` marker, 5 byte sql_state, message to
/// the end of the packet. Pre-4.1 servers omit the marker and state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ErrorPacket {
    /// Parse the bytes after the 0xFF response marker.
    pub fn parse(body: &[u8]) -> TbrResult<ErrorPacket> {
        if body.len() < 2 {
            return Err(TbrError::Incomplete(Needed::NoEnoughData));
        }
        let error_code = u16::from_le_bytes([body[0], body[1]]);
        let rest = &body[2..];

        let (sql_state, message) = if rest.first() == Some(&b'#') && rest.len() >= 6 {
            (
                String::from_utf8_lossy(&rest[1..6]).to_string(),
                String::from_utf8_lossy(&rest[6..]).to_string(),
            )
        } else {
            (String::new(), String::from_utf8_lossy(rest).to_string())
        };

        Ok(ErrorPacket {
            error_code,
            sql_state,
            message,
        })
    }
}

/// Turn an ERR packet into a CommandFailed error carrying the context of
/// the command that triggered it. Anything else passes through.
pub fn check_error_packet(packet: &[u8], context: &str) -> TbrResult<()> {
    if packet.first() == Some(&ResponseType::ERROR) {
        let err = ErrorPacket::parse(&packet[1..])?;
        return Err(TbrError::CommandFailed(format!(
            "{} error {} ({}): {}",
            context, err.error_code, err.sql_state, err.message
        )));
    }
    Ok(())
}
