use std::io::{self, Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use binlog::gtid::{Gtid, MYSQL_GTID_ENCODED_LEN};

use crate::commands::command::CommandType;

/// COM_BINLOG_DUMP_GTID, used only against MySQL servers: cmd u8, flags
/// u16, server_id u32, binlog_name_len u32 (0, no name), pos u64 (4),
/// gtid_data_len u32 (24) and the encoded GTID verbatim.
pub struct DumpBinlogGtidCommand {
    pub server_id: u32,
    pub gtid: Gtid,
    pub flags: u16,
}

impl DumpBinlogGtidCommand {
    pub fn new(server_id: u32, gtid: Gtid) -> Self {
        Self {
            server_id,
            gtid,
            flags: 0,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, io::Error> {
        let mut vec = Vec::new();
        let mut cursor = Cursor::new(&mut vec);

        cursor.write_u8(CommandType::BinlogDumpGtid as u8)?;
        cursor.write_u16::<LittleEndian>(self.flags)?;
        cursor.write_u32::<LittleEndian>(self.server_id)?;
        cursor.write_u32::<LittleEndian>(0)?; // binlog_name_len, no name
        cursor.write_u64::<LittleEndian>(4)?; // pos
        cursor.write_u32::<LittleEndian>(MYSQL_GTID_ENCODED_LEN as u32)?;
        cursor.write_all(&self.gtid.encoded())?;

        Ok(vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let sid = [9u8; 16];
        let gtid = Gtid::mysql(sid, 77);
        let bytes = DumpBinlogGtidCommand::new(1, gtid.clone()).serialize().unwrap();

        assert_eq!(bytes[0], 0x1E);
        assert_eq!(u16::from_le_bytes([bytes[1], bytes[2]]), 0);
        assert_eq!(u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]), 1);
        assert_eq!(u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]), 0);
        assert_eq!(
            u64::from_le_bytes(bytes[11..19].try_into().unwrap()),
            4
        );
        assert_eq!(
            u32::from_le_bytes(bytes[19..23].try_into().unwrap()),
            MYSQL_GTID_ENCODED_LEN as u32
        );
        assert_eq!(&bytes[23..], gtid.encoded().as_slice());
        assert_eq!(bytes.len(), 23 + MYSQL_GTID_ENCODED_LEN);
    }
}
