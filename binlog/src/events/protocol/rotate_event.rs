use nom::number::complete::le_u64;
use nom::IResult;
use serde::Serialize;

use common::err::TbrResult;

use crate::events::event_header::Header;
use crate::utils::{finish, read_fixed_len_string};

/// The binlog switched to a new file, either because the old one filled
/// up, the server restarted, or FLUSH LOGS ran.
///
/// Payload: the position to continue from as u64, then the new file name
/// filling the rest of the event (event_length - 19 - 8 bytes). The
/// rotate's own next_position may legitimately be 0.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct RotateEvent {
    pub header: Header,

    /// Name of the next binlog file.
    pub binlog_file: String,

    /// Position to resume at inside the new file, typically 4.
    pub binlog_pos: u64,
}

impl RotateEvent {
    pub fn parse(payload: &[u8], header: &Header) -> TbrResult<RotateEvent> {
        finish(parse_inner(payload, header), "rotate event")
    }
}

fn parse_inner<'a>(input: &'a [u8], header: &Header) -> IResult<&'a [u8], RotateEvent> {
    let (i, binlog_pos) = le_u64(input)?;
    let (i, binlog_file) = read_fixed_len_string(i, i.len())?;

    Ok((
        i,
        RotateEvent {
            header: header.clone(),
            binlog_file,
            binlog_pos,
        },
    ))
}
