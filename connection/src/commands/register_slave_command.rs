use std::io::{self, Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::commands::command::CommandType;

/// COM_REGISTER_SLAVE: announces this client as a replica so the master
/// lists it in SHOW SLAVE HOSTS and will feed it a binlog dump.
///
/// Layout: cmd u8, server_id u32, then report-host, user and password as
/// one byte length prefixed strings, port u16, replication rank u32 and
/// master id u32 (both always 0).
pub struct RegisterSlaveCommand {
    pub server_id: u32,
    pub report_host: String,
    pub report_user: String,
    pub report_password: String,
    pub report_port: u16,
}

impl RegisterSlaveCommand {
    pub fn new(
        server_id: u32,
        report_host: &str,
        report_user: &str,
        report_password: &str,
        report_port: u16,
    ) -> Self {
        Self {
            server_id,
            report_host: report_host.to_string(),
            report_user: report_user.to_string(),
            report_password: report_password.to_string(),
            report_port,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, io::Error> {
        let mut vec = Vec::new();
        let mut cursor = Cursor::new(&mut vec);

        cursor.write_u8(CommandType::RegisterSlave as u8)?;
        cursor.write_u32::<LittleEndian>(self.server_id)?;
        cursor.write_u8(self.report_host.len() as u8)?;
        cursor.write_all(self.report_host.as_bytes())?;
        cursor.write_u8(self.report_user.len() as u8)?;
        cursor.write_all(self.report_user.as_bytes())?;
        cursor.write_u8(self.report_password.len() as u8)?;
        cursor.write_all(self.report_password.as_bytes())?;
        cursor.write_u16::<LittleEndian>(self.report_port)?;
        cursor.write_u32::<LittleEndian>(0)?; // replication rank
        cursor.write_u32::<LittleEndian>(0)?; // master id

        Ok(vec)
    }
}
