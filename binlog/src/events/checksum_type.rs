use serde::Serialize;

/// Event checksum algorithm, negotiated with
/// `SET @master_binlog_checksum = @@global.binlog_checksum` and announced
/// in the format description event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChecksumType {
    None,
    Crc32,
}

impl ChecksumType {
    /// From the server variable value (`SELECT @master_binlog_checksum`).
    pub fn from_name(name: &str) -> ChecksumType {
        if name.eq_ignore_ascii_case("CRC32") {
            ChecksumType::Crc32
        } else {
            ChecksumType::None
        }
    }

    /// From the algorithm byte of the format description event.
    pub fn from_code(code: u8) -> ChecksumType {
        match code {
            1 => ChecksumType::Crc32,
            _ => ChecksumType::None,
        }
    }

    /// Bytes this algorithm appends to every event.
    pub fn length(&self) -> usize {
        match self {
            ChecksumType::None => 0,
            ChecksumType::Crc32 => 4,
        }
    }
}

/// Verify and strip the trailing CRC32 of one raw event (marker already
/// removed, header included). Returns the event without the checksum, or
/// None on mismatch.
pub fn verify_and_strip_crc32(raw: &[u8]) -> Option<&[u8]> {
    if raw.len() < 4 {
        return None;
    }
    let (body, tail) = raw.split_at(raw.len() - 4);
    let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    if crc32fast::hash(body) == expected {
        Some(body)
    } else {
        None
    }
}
