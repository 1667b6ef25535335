use serde::Serialize;

use common::err::{Needed, TbrError, TbrResult};

use crate::b_type::LogEventType;
use crate::events::event_header::{Header, LOG_EVENT_HEADER_LEN};
use crate::events::protocol::format_description_event::FormatDescriptionEvent;
use crate::events::protocol::gtid_event::GtidEvent;
use crate::events::protocol::incident_event::IncidentEvent;
use crate::events::protocol::int_var_event::IntVarEvent;
use crate::events::protocol::query_event::QueryEvent;
use crate::events::protocol::rotate_event::RotateEvent;
use crate::events::protocol::rows_event::RowsEvent;
use crate::events::protocol::table_map_event::TableMapEvent;
use crate::events::protocol::user_var_event::UserVarEvent;
use crate::events::protocol::xid_event::XidEvent;

/// Event types the core does not act on keep their raw payload so that
/// handlers can still serialize them unchanged.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct UnknownEvent {
    pub header: Header,

    pub raw: Vec<u8>,
}

/// One decoded binlog event. Closed set dispatch: everything the core
/// acts on has a variant, everything else is Unknown.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub enum Event {
    Query(QueryEvent),
    Gtid(GtidEvent),
    Rotate(RotateEvent),
    TableMap(TableMapEvent),
    Rows(RowsEvent),
    IntVar(IntVarEvent),
    UserVar(UserVarEvent),
    Incident(IncidentEvent),
    Xid(XidEvent),
    FormatDescription(FormatDescriptionEvent),
    Unknown(UnknownEvent),
}

impl Event {
    /// Decode one complete raw event (marker stripped, checksum
    /// stripped). Unsupported type codes yield `Unknown`; malformed
    /// payloads of supported types are an error the caller logs before
    /// continuing with the next event.
    pub fn decode(raw: &[u8]) -> TbrResult<Event> {
        if raw.len() < LOG_EVENT_HEADER_LEN {
            return Err(TbrError::Incomplete(Needed::NoEnoughData));
        }
        let (payload, header) = match Header::parse(raw) {
            Ok((rest, header)) => (rest, header),
            Err(_) => {
                return Err(TbrError::ProtocolViolation(
                    "Unparsable event header".to_string(),
                ))
            }
        };

        let event_type = match LogEventType::try_from(header.event_type) {
            Ok(t) => t,
            Err(_) => return Ok(Event::unknown(header, payload)),
        };

        let event = match event_type {
            LogEventType::QueryEvent => Event::Query(QueryEvent::parse(payload, &header)?),
            LogEventType::RotateEvent => Event::Rotate(RotateEvent::parse(payload, &header)?),
            LogEventType::TableMapEvent => {
                Event::TableMap(TableMapEvent::parse(payload, &header)?)
            }
            LogEventType::IntvarEvent => Event::IntVar(IntVarEvent::parse(payload, &header)?),
            LogEventType::UserVarEvent => Event::UserVar(UserVarEvent::parse(payload, &header)?),
            LogEventType::IncidentEvent => {
                Event::Incident(IncidentEvent::parse(payload, &header)?)
            }
            LogEventType::XidEvent => Event::Xid(XidEvent::parse(payload, &header)?),
            LogEventType::FormatDescriptionEvent => {
                Event::FormatDescription(FormatDescriptionEvent::parse(payload, &header)?)
            }
            LogEventType::GtidMariadbEvent => {
                Event::Gtid(GtidEvent::parse_mariadb(payload, &header)?)
            }
            LogEventType::GtidMysqlEvent => Event::Gtid(GtidEvent::parse_mysql(payload, &header)?),
            t if t.is_rows_event() => Event::Rows(RowsEvent::parse(payload, &header, t)?),
            _ => Event::unknown(header, payload),
        };

        Ok(event)
    }

    pub fn unknown(header: Header, payload: &[u8]) -> Event {
        Event::Unknown(UnknownEvent {
            header,
            raw: payload.to_vec(),
        })
    }

    pub fn header(&self) -> &Header {
        match self {
            Event::Query(e) => &e.header,
            Event::Gtid(e) => &e.header,
            Event::Rotate(e) => &e.header,
            Event::TableMap(e) => &e.header,
            Event::Rows(e) => &e.header,
            Event::IntVar(e) => &e.header,
            Event::UserVar(e) => &e.header,
            Event::Incident(e) => &e.header,
            Event::Xid(e) => &e.header,
            Event::FormatDescription(e) => &e.header,
            Event::Unknown(e) => &e.header,
        }
    }

    pub fn get_type_name(&self) -> &'static str {
        match self {
            Event::Query(_) => "Query",
            Event::Gtid(_) => "Gtid",
            Event::Rotate(_) => "Rotate",
            Event::TableMap(_) => "TableMap",
            Event::Rows(_) => "Rows",
            Event::IntVar(_) => "IntVar",
            Event::UserVar(_) => "UserVar",
            Event::Incident(_) => "Incident",
            Event::Xid(_) => "Xid",
            Event::FormatDescription(_) => "FormatDescription",
            Event::Unknown(_) => "Unknown",
        }
    }
}
