use nom::bytes::complete::{tag, take};
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::IResult;
use serde::Serialize;

use common::err::TbrResult;

use crate::events::event_header::Header;
use crate::utils::{finish, read_fixed_len_string};

/// One logged statement.
///
/// Post-header: thread_id (4), exec_time (4), db_len (1), error_code (2),
/// status_vars_len (2). Body: status variable block (opaque here), the
/// current database as db_len bytes plus a NUL, then the SQL text filling
/// the rest of the event:
///
///   sql_len = event_length - 19 - 13 - status_vars_len - db_len - 1
///
/// The SQL bytes are not guaranteed to be UTF-8; they are kept lossily.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct QueryEvent {
    pub header: Header,

    /// Client thread that issued the query, unique per server.
    pub thread_id: u32,

    /// Seconds from query start to it being logged.
    pub exec_time: u32,

    pub error_code: u16,

    /// Status variable block, kept opaque.
    pub status_vars: Vec<u8>,

    /// Currently selected database when the statement ran.
    pub db_name: String,

    pub sql: String,
}

impl QueryEvent {
    pub fn parse(payload: &[u8], header: &Header) -> TbrResult<QueryEvent> {
        finish(parse_inner(payload, header), "query event")
    }
}

fn parse_inner<'a>(input: &'a [u8], header: &Header) -> IResult<&'a [u8], QueryEvent> {
    let (i, thread_id) = le_u32(input)?;
    let (i, exec_time) = le_u32(i)?;
    let (i, db_len) = le_u8(i)?;
    let (i, error_code) = le_u16(i)?;
    let (i, status_vars_len) = le_u16(i)?;

    let (i, status_vars) = take(status_vars_len)(i)?;
    let (i, db_name) = read_fixed_len_string(i, db_len as usize)?;
    let (i, _) = tag([0u8])(i)?;

    // Everything left is the statement text; with the checksum already
    // stripped this equals the documented length formula.
    let (i, sql) = read_fixed_len_string(i, i.len())?;

    Ok((
        i,
        QueryEvent {
            header: header.clone(),
            thread_id,
            exec_time,
            error_code,
            status_vars: status_vars.to_vec(),
            db_name,
            sql,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_payload(status_vars: &[u8], db: &str, sql: &str) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&77u32.to_le_bytes()); // thread_id
        payload.extend_from_slice(&3u32.to_le_bytes()); // exec_time
        payload.push(db.len() as u8);
        payload.extend_from_slice(&0u16.to_le_bytes()); // error_code
        payload.extend_from_slice(&(status_vars.len() as u16).to_le_bytes());
        payload.extend_from_slice(status_vars);
        payload.extend_from_slice(db.as_bytes());
        payload.push(0);
        payload.extend_from_slice(sql.as_bytes());
        payload
    }

    #[test]
    fn parse_create_table() {
        let sql = "CREATE TABLE db1.t1 (id INT)";
        let payload = build_payload(&[0x00, 0x01], "db1", sql);
        let header = Header::new(0, 2, 10, (19 + payload.len()) as u32, 120, 0);

        let event = QueryEvent::parse(&payload, &header).unwrap();
        assert_eq!(event.thread_id, 77);
        assert_eq!(event.exec_time, 3);
        assert_eq!(event.error_code, 0);
        assert_eq!(event.status_vars, vec![0x00, 0x01]);
        assert_eq!(event.db_name, "db1");
        assert_eq!(event.sql, sql);
        assert_eq!(event.header.next_position, 120);
    }

    #[test]
    fn parse_empty_db() {
        let payload = build_payload(&[], "", "BEGIN");
        let header = Header::new(0, 2, 1, (19 + payload.len()) as u32, 0, 0);
        let event = QueryEvent::parse(&payload, &header).unwrap();
        assert_eq!(event.db_name, "");
        assert_eq!(event.sql, "BEGIN");
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let payload = build_payload(&[], "db", "SELECT 1");
        assert!(QueryEvent::parse(&payload[..10], &Header::default()).is_err());
    }

    #[test]
    fn missing_nul_is_rejected() {
        let mut payload = build_payload(&[], "db", "X");
        // corrupt the NUL terminator after the database name
        let nul_at = payload.len() - 2;
        payload[nul_at] = b'!';
        assert!(QueryEvent::parse(&payload, &Header::default()).is_err());
    }
}
