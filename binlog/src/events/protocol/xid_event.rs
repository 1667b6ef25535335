use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;

use common::err::TbrResult;

use crate::events::event_header::Header;

/// Transaction commit marker. Payload: the XA transaction id as u64.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct XidEvent {
    pub header: Header,

    pub xid: u64,
}

impl XidEvent {
    pub fn parse(payload: &[u8], header: &Header) -> TbrResult<XidEvent> {
        let mut cursor = Cursor::new(payload);
        let xid = cursor.read_u64::<LittleEndian>()?;

        Ok(XidEvent {
            header: header.clone(),
            xid,
        })
    }
}
