use common::err::{Needed, TbrError, TbrResult};

use binlog::utils::read_len_enc_num;

/// One text protocol result row: length encoded strings, 0xFB for NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSetRowPacket {
    pub cells: Vec<Option<String>>,
}

impl ResultSetRowPacket {
    pub fn parse(packet: &[u8]) -> TbrResult<ResultSetRowPacket> {
        let mut cells = Vec::new();
        let mut rest = packet;

        while !rest.is_empty() {
            if rest[0] == 0xFB {
                cells.push(None);
                rest = &rest[1..];
                continue;
            }
            let (after, (_, len)) = read_len_enc_num(rest).map_err(|_| {
                TbrError::ProtocolViolation("Bad length in result set row".to_string())
            })?;
            if after.len() < len as usize {
                return Err(TbrError::Incomplete(Needed::NoEnoughData));
            }
            let (value, after_value) = after.split_at(len as usize);
            cells.push(Some(String::from_utf8_lossy(value).to_string()));
            rest = after_value;
        }

        Ok(ResultSetRowPacket { cells })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_row_with_null() {
        // "binlog.000002" | NULL | "4"
        let mut packet = vec![13u8];
        packet.extend_from_slice(b"binlog.000002");
        packet.push(0xFB);
        packet.push(1);
        packet.push(b'4');

        let row = ResultSetRowPacket::parse(&packet).unwrap();
        assert_eq!(
            row.cells,
            vec![Some("binlog.000002".to_string()), None, Some("4".to_string())]
        );
    }

    #[test]
    fn truncated_cell_is_rejected() {
        let packet = vec![5u8, b'a', b'b'];
        assert!(ResultSetRowPacket::parse(&packet).is_err());
    }
}
