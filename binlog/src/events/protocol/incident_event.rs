use nom::number::complete::le_u8;
use nom::IResult;
use serde::Serialize;

use common::err::TbrResult;

use crate::b_type::LogEventType;
use crate::events::event_header::Header;
use crate::utils::{finish, read_len_prefixed_string};

/// Incident code used for synthetic incidents injected on read errors.
pub const INCIDENT_LOST_EVENTS: u8 = 175;

/// Something out of the ordinary happened on the master, or the client
/// manufactured an incident to surface an I/O failure through the event
/// pipeline. Payload: code u8, message as a one byte length prefixed
/// string.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct IncidentEvent {
    pub header: Header,

    pub code: u8,

    pub message: String,
}

impl IncidentEvent {
    pub fn parse(payload: &[u8], header: &Header) -> TbrResult<IncidentEvent> {
        finish(parse_inner(payload, header), "incident event")
    }

    /// Build a synthetic incident carrying the last known binlog offset
    /// in its header, for injection into the pipeline.
    pub fn synthetic(code: u8, message: &str, pos: u64) -> IncidentEvent {
        let header = Header::new(
            0,
            LogEventType::IncidentEvent as u8,
            0,
            0,
            pos as u32,
            0,
        );
        IncidentEvent {
            header,
            code,
            message: message.to_string(),
        }
    }
}

fn parse_inner<'a>(input: &'a [u8], header: &Header) -> IResult<&'a [u8], IncidentEvent> {
    let (i, code) = le_u8(input)?;
    let (i, (_, message)) = read_len_prefixed_string(i)?;

    Ok((
        i,
        IncidentEvent {
            header: header.clone(),
            code,
            message,
        },
    ))
}
