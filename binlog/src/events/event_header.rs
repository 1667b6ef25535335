use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::IResult;
use serde::Serialize;

/// Decoded size of the common event header.
///
/// On the wire each event of the dump stream is preceded by a one byte
/// marker (0x00 for events); the marker is not part of `event_length`.
pub const LOG_EVENT_HEADER_LEN: usize = 19;

/// Common binlog event header.
///
/// ```text
///                      [startPos : Len]
/// +=====================================+
/// | event  | timestamp         0 : 4    |
/// | header +----------------------------+
/// |        | event_type        4 : 1    |
/// |        +----------------------------+
/// |        | server_id         5 : 4    |
/// |        +----------------------------+
/// |        | event_length      9 : 4    |  includes this header
/// |        +----------------------------+
/// |        | next_position    13 : 4    |  offset of the next event
/// |        +----------------------------+
/// |        | flags            17 : 2    |
/// +=====================================+
/// ```
///
/// Little endian throughout; a server_id of 1 travels as 01 00 00 00.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Default)]
pub struct Header {
    /// Creation time, seconds since the Unix epoch.
    pub timestamp: u32,

    pub event_type: u8,

    /// Originating server, used to keep circular replication from
    /// re-applying events.
    pub server_id: u32,

    /// Event size including the header itself.
    pub event_length: u32,

    /// Byte offset of the next event in the same binlog file. May be 0
    /// on a ROTATE or on synthetic events.
    pub next_position: u32,

    pub flags: u16,
}

impl Header {
    pub fn new(
        timestamp: u32,
        event_type: u8,
        server_id: u32,
        event_length: u32,
        next_position: u32,
        flags: u16,
    ) -> Self {
        Header {
            timestamp,
            event_type,
            server_id,
            event_length,
            next_position,
            flags,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Header> {
        let (i, timestamp) = le_u32(input)?;
        let (i, event_type) = le_u8(i)?;
        let (i, server_id) = le_u32(i)?;
        let (i, event_length) = le_u32(i)?;
        let (i, next_position) = le_u32(i)?;
        let (i, flags) = le_u16(i)?;

        Ok((
            i,
            Header::new(timestamp, event_type, server_id, event_length, next_position, flags),
        ))
    }

    /// Byte-identical re-emission for handlers that serialize events.
    pub fn to_bytes(&self) -> [u8; LOG_EVENT_HEADER_LEN] {
        let mut out = [0u8; LOG_EVENT_HEADER_LEN];
        out[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        out[4] = self.event_type;
        out[5..9].copy_from_slice(&self.server_id.to_le_bytes());
        out[9..13].copy_from_slice(&self.event_length.to_le_bytes());
        out[13..17].copy_from_slice(&self.next_position.to_le_bytes());
        out[17..19].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Well-formedness per the stream invariants: the length covers at
    /// least the header and next_position does not point inside the
    /// event (0 is legal on rotate and synthetic events).
    pub fn is_well_formed(&self) -> bool {
        self.event_length as usize >= LOG_EVENT_HEADER_LEN
            && (self.next_position == 0 || self.next_position >= self.event_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_reemit() {
        let bytes: Vec<u8> = vec![
            0x10, 0x32, 0x54, 0x76, // timestamp
            0x02, // type: query
            0x0a, 0x00, 0x00, 0x00, // server_id = 10
            0x40, 0x00, 0x00, 0x00, // event_length = 64
            0x78, 0x00, 0x00, 0x00, // next_position = 120
            0x01, 0x00, // flags
        ];
        let (rest, header) = Header::parse(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header.timestamp, 0x76543210);
        assert_eq!(header.event_type, 2);
        assert_eq!(header.server_id, 10);
        assert_eq!(header.event_length, 64);
        assert_eq!(header.next_position, 120);
        assert_eq!(header.flags, 1);

        assert_eq!(header.to_bytes().to_vec(), bytes);
    }

    #[test]
    fn well_formedness() {
        let mut header = Header::new(0, 4, 1, 44, 0, 0);
        assert!(header.is_well_formed());
        header.next_position = 200;
        assert!(header.is_well_formed());
        header.next_position = 30;
        assert!(!header.is_well_formed());
        header.event_length = 10;
        assert!(!header.is_well_formed());
    }
}
