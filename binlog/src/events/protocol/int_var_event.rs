use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;

use common::err::TbrResult;

use crate::events::event_header::Header;

pub const INT_VAR_LAST_INSERT_ID: u8 = 1;
pub const INT_VAR_INSERT_ID: u8 = 2;

/// auto_increment / LAST_INSERT_ID bookkeeping for statement based
/// replication. Payload: type u8, value u64.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct IntVarEvent {
    pub header: Header,

    pub var_type: u8,

    pub value: u64,
}

impl IntVarEvent {
    pub fn parse(payload: &[u8], header: &Header) -> TbrResult<IntVarEvent> {
        let mut cursor = Cursor::new(payload);
        let var_type = cursor.read_u8()?;
        let value = cursor.read_u64::<LittleEndian>()?;

        Ok(IntVarEvent {
            header: header.clone(),
            var_type,
            value,
        })
    }
}
