use common::err::{Needed, TbrError, TbrResult};

/// OK packet: lenenc affected_rows, lenenc insert_id, status u16,
/// warnings u16, optional human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub insert_id: u64,
    pub status_flags: u16,
    pub warning_count: u16,
    pub message: String,
}

impl OkPacket {
    /// Parse the bytes after the 0x00 response marker.
    pub fn parse(body: &[u8]) -> TbrResult<OkPacket> {
        let (affected_rows, rest) = lenenc(body)?;
        let (insert_id, rest) = lenenc(rest)?;
        if rest.len() < 4 {
            return Err(TbrError::Incomplete(Needed::NoEnoughData));
        }
        let status_flags = u16::from_le_bytes([rest[0], rest[1]]);
        let warning_count = u16::from_le_bytes([rest[2], rest[3]]);
        let message = String::from_utf8_lossy(&rest[4..]).to_string();

        Ok(OkPacket {
            affected_rows,
            insert_id,
            status_flags,
            warning_count,
            message,
        })
    }
}

fn lenenc(input: &[u8]) -> TbrResult<(u64, &[u8])> {
    let first = *input
        .first()
        .ok_or(TbrError::Incomplete(Needed::NoEnoughData))?;
    let (width, value) = match first {
        0..=0xfa => (1, first as u64),
        0xfc => (3, read_le(&input[1..], 2)?),
        0xfd => (4, read_le(&input[1..], 3)?),
        0xfe => (9, read_le(&input[1..], 8)?),
        _ => {
            return Err(TbrError::ProtocolViolation(format!(
                "Reserved length marker 0x{:02x} in OK packet",
                first
            )))
        }
    };
    if input.len() < width {
        return Err(TbrError::Incomplete(Needed::NoEnoughData));
    }
    Ok((value, &input[width..]))
}

fn read_le(input: &[u8], width: usize) -> TbrResult<u64> {
    if input.len() < width {
        return Err(TbrError::Incomplete(Needed::NoEnoughData));
    }
    let mut value = 0u64;
    for (idx, byte) in input[..width].iter().enumerate() {
        value |= (*byte as u64) << (8 * idx);
    }
    Ok(value)
}
