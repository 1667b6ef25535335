use std::io::{self, Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::commands::command::CommandType;

/// COM_BINLOG_DUMP: cmd u8, offset u32, flags u16 (0: block waiting for
/// new events), server_id u32, binlog file name to the end of the
/// packet. A GTID driven MariaDB dump sends offset 4 and an empty file
/// name, relying on @slave_connect_state.
pub struct DumpBinlogCommand {
    pub server_id: u32,
    pub binlog_filename: String,
    pub binlog_position: u64,
    pub flags: u16,
}

impl DumpBinlogCommand {
    pub fn new(server_id: u32, binlog_filename: String, binlog_position: u64) -> Self {
        Self {
            server_id,
            binlog_filename,
            binlog_position,
            flags: 0,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, io::Error> {
        let mut vec = Vec::new();
        let mut cursor = Cursor::new(&mut vec);

        cursor.write_u8(CommandType::BinlogDump as u8)?;
        cursor.write_u32::<LittleEndian>(self.binlog_position as u32)?;
        cursor.write_u16::<LittleEndian>(self.flags)?;
        cursor.write_u32::<LittleEndian>(self.server_id)?;
        cursor.write_all(self.binlog_filename.as_bytes())?;

        Ok(vec)
    }
}
