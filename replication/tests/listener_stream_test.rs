//! End to end listener tests against a scripted server: handshake,
//! replica registration, session setup, dump, and a short event stream.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use common::config::{ListenerSpec, StartPosition};

use binlog::b_type::LogEventType;
use binlog::events::event_header::Header;

use replication::listener::ReplicationListener;
use replication::registry::{ConsistencyRegistry, CursorBoard};

fn frame(payload: &[u8], seq: u8) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
    out.push(seq);
    out.extend_from_slice(payload);
    out
}

fn ok_frame(seq: u8) -> Vec<u8> {
    frame(&[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00], seq)
}

fn eof_frame(seq: u8) -> Vec<u8> {
    frame(&[0xFE, 0x00, 0x00, 0x02, 0x00], seq)
}

fn handshake_frame() -> Vec<u8> {
    let scramble = [9u8; 20];
    let mut packet = Vec::new();
    packet.push(10u8);
    packet.extend_from_slice(b"5.5.5-10.6.14-MariaDB-log");
    packet.push(0);
    packet.extend_from_slice(&42u32.to_le_bytes());
    packet.extend_from_slice(&scramble[..8]);
    packet.push(0);
    packet.extend_from_slice(&0xf7ffu16.to_le_bytes());
    packet.push(33);
    packet.extend_from_slice(&2u16.to_le_bytes());
    packet.extend_from_slice(&[0u8; 13]);
    packet.extend_from_slice(&scramble[8..20]);
    packet.push(0);
    frame(&packet, 0)
}

fn read_client_packet(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    payload
}

fn text_result_set(stream: &mut TcpStream, value: &str) {
    stream.write_all(&frame(&[1], 1)).unwrap(); // one column
    stream.write_all(&frame(b"\x03def", 2)).unwrap(); // column definition, skipped
    stream.write_all(&eof_frame(3)).unwrap();
    let mut row = vec![value.len() as u8];
    row.extend_from_slice(value.as_bytes());
    stream.write_all(&frame(&row, 4)).unwrap();
    stream.write_all(&eof_frame(5)).unwrap();
}

fn event_frame(header: Header, payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![0x00];
    raw.extend_from_slice(&header.to_bytes());
    raw.extend_from_slice(payload);
    frame(&raw, 0)
}

fn query_event(server_id: u32, next_position: u32, db: &str, sql: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&7u32.to_le_bytes()); // thread id
    payload.extend_from_slice(&0u32.to_le_bytes()); // exec time
    payload.push(db.len() as u8);
    payload.extend_from_slice(&0u16.to_le_bytes()); // error code
    payload.extend_from_slice(&0u16.to_le_bytes()); // status vars len
    payload.extend_from_slice(db.as_bytes());
    payload.push(0);
    payload.extend_from_slice(sql.as_bytes());
    let header = Header::new(
        0,
        LogEventType::QueryEvent as u8,
        server_id,
        (19 + payload.len()) as u32,
        next_position,
        0,
    );
    event_frame(header, &payload)
}

fn table_map_event(server_id: u32, next_position: u32, table_id: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&table_id.to_le_bytes()[..6]);
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&[3, b'd', b'b', b'1', 0, 2, b't', b'1', 0]);
    payload.push(1); // one column
    payload.push(3); // LONG
    payload.push(0); // empty metadata block
    payload.push(0); // null bitmap
    let header = Header::new(
        0,
        LogEventType::TableMapEvent as u8,
        server_id,
        (19 + payload.len()) as u32,
        next_position,
        0,
    );
    event_frame(header, &payload)
}

fn write_rows_event(server_id: u32, next_position: u32, table_id: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&table_id.to_le_bytes()[..6]);
    payload.extend_from_slice(&1u16.to_le_bytes());
    payload.push(1); // one column
    payload.push(0b1); // used columns
    payload.extend_from_slice(&[0b0, 1, 0, 0, 0]); // null bits + value
    let header = Header::new(
        0,
        LogEventType::WriteRowsEventV1 as u8,
        server_id,
        (19 + payload.len()) as u32,
        next_position,
        0,
    );
    event_frame(header, &payload)
}

fn rotate_event(server_id: u32, file: &str, pos: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&pos.to_le_bytes());
    payload.extend_from_slice(file.as_bytes());
    let header = Header::new(
        0,
        LogEventType::RotateEvent as u8,
        server_id,
        (19 + payload.len()) as u32,
        0,
        0,
    );
    event_frame(header, &payload)
}

enum StreamEnd {
    CleanEof,
    AbruptClose,
}

/// Script one full replica session and stream the given events. When a
/// GTID start is expected, the session must carry the
/// @slave_connect_state exchange and dump with offset 4 and an empty
/// file name.
fn scripted_server(
    events: Vec<Vec<u8>>,
    end: StreamEnd,
    expect_gtid: Option<String>,
) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        stream.write_all(&handshake_frame()).unwrap();
        let _auth = read_client_packet(&mut stream);
        stream.write_all(&ok_frame(2)).unwrap();

        let register = read_client_packet(&mut stream);
        assert_eq!(register[0], 0x15, "expected COM_REGISTER_SLAVE");
        stream.write_all(&ok_frame(1)).unwrap();

        let capability = read_client_packet(&mut stream);
        assert_eq!(capability[0], 0x03);
        assert!(String::from_utf8_lossy(&capability[1..]).contains("mariadb_slave_capability"));
        stream.write_all(&ok_frame(1)).unwrap();

        if let Some(gtid) = &expect_gtid {
            let connect_state = read_client_packet(&mut stream);
            let sql = String::from_utf8_lossy(&connect_state[1..]).to_string();
            assert!(
                sql.contains(&format!("@slave_connect_state='{}'", gtid)),
                "unexpected connect state: {}",
                sql
            );
            stream.write_all(&ok_frame(1)).unwrap();
        }

        let checksum_set = read_client_packet(&mut stream);
        assert!(String::from_utf8_lossy(&checksum_set[1..]).contains("master_binlog_checksum"));
        stream.write_all(&ok_frame(1)).unwrap();

        let checksum_select = read_client_packet(&mut stream);
        assert!(String::from_utf8_lossy(&checksum_select[1..]).starts_with("SELECT"));
        text_result_set(&mut stream, "NONE");

        let dump = read_client_packet(&mut stream);
        assert_eq!(dump[0], 0x12, "expected COM_BINLOG_DUMP");
        if expect_gtid.is_some() {
            let offset = u32::from_le_bytes([dump[1], dump[2], dump[3], dump[4]]);
            assert_eq!(offset, 4);
            assert_eq!(dump.len(), 11, "gtid dump must carry no file name");
        }

        for event in events {
            stream.write_all(&event).unwrap();
        }
        match end {
            StreamEnd::CleanEof => {
                stream.write_all(&eof_frame(0)).unwrap();
            }
            StreamEnd::AbruptClose => {}
        }
        // socket closes when the thread ends
    });

    addr
}

fn run_listener_from(
    addr: std::net::SocketAddr,
    start: StartPosition,
) -> (
    Arc<ConsistencyRegistry>,
    Arc<CursorBoard>,
    Result<(), common::err::TbrError>,
) {
    let registry = Arc::new(ConsistencyRegistry::new());
    let cursors = Arc::new(CursorBoard::new());

    let spec = ListenerSpec::new(
        &format!("mysql://repl:pw@127.0.0.1:{}", addr.port()),
        start,
        true,
        0,
    );
    let (listener, _controller) =
        ReplicationListener::new(spec, 1, registry.clone(), cursors.clone()).unwrap();
    let result = listener.run();
    (registry, cursors, result)
}

fn run_listener(
    addr: std::net::SocketAddr,
) -> (
    Arc<ConsistencyRegistry>,
    Arc<CursorBoard>,
    Result<(), common::err::TbrError>,
) {
    run_listener_from(
        addr,
        StartPosition::FileOffset {
            file: "binlog.000001".to_string(),
            offset: 4,
        },
    )
}

fn mariadb_gtid_event(server_id: u32, next_position: u32, domain: u32, sequence: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&sequence.to_le_bytes());
    payload.extend_from_slice(&domain.to_le_bytes());
    payload.push(0); // flags
    let header = Header::new(
        0,
        LogEventType::GtidMariadbEvent as u8,
        server_id,
        (19 + payload.len()) as u32,
        next_position,
        0,
    );
    event_frame(header, &payload)
}

#[test]
fn statement_and_row_events_update_the_registry() {
    let addr = scripted_server(
        vec![
            query_event(10, 120, "db1", "CREATE TABLE db1.t1 (id INT)"),
            table_map_event(10, 180, 7),
            write_rows_event(10, 256, 7),
        ],
        StreamEnd::CleanEof,
        None,
    );

    let (registry, cursors, result) = run_listener(addr);
    result.unwrap();

    let record = registry.query("db1.t1", 0).unwrap();
    assert_eq!(record.server_id, 10);
    assert_eq!(record.binlog_pos, 256);
    assert!(!record.gtid_known);

    let cursor = cursors.get(10).unwrap();
    assert_eq!(cursor.binlog_pos, 256);
    assert_eq!(cursor.binlog_file, "binlog.000001");
}

#[test]
fn mariadb_gtid_session_attaches_gtids_to_updates() {
    let addr = scripted_server(
        vec![
            mariadb_gtid_event(10, 150, 0, 43),
            table_map_event(10, 180, 7),
            write_rows_event(10, 900, 7),
        ],
        StreamEnd::CleanEof,
        Some("0-10-42".to_string()),
    );

    let (registry, cursors, result) =
        run_listener_from(addr, StartPosition::MariaGtid("0-10-42".to_string()));
    result.unwrap();

    let record = registry.query("db1.t1", 0).unwrap();
    assert_eq!(record.binlog_pos, 900);
    assert!(record.gtid_known);
    assert_eq!(record.gtid.string(), "0-10-43");

    let cursor = cursors.get(10).unwrap();
    assert!(cursor.gtid_known);
    assert_eq!(cursor.gtid.string(), "0-10-43");
}

#[test]
fn rotate_moves_the_cursor_to_the_new_file() {
    let addr = scripted_server(
        vec![
            table_map_event(10, 180, 7),
            write_rows_event(10, 256, 7),
            rotate_event(10, "binlog.000002", 4),
        ],
        StreamEnd::CleanEof,
        None,
    );

    let (_registry, cursors, result) = run_listener(addr);
    result.unwrap();

    let cursor = cursors.get(10).unwrap();
    assert_eq!(cursor.binlog_file, "binlog.000002");
    assert_eq!(cursor.binlog_pos, 4);
}

#[test]
fn read_error_surfaces_as_incident_and_preserves_state() {
    let addr = scripted_server(
        vec![table_map_event(10, 180, 7), write_rows_event(10, 256, 7)],
        StreamEnd::AbruptClose,
        None,
    );

    let (registry, _cursors, result) = run_listener(addr);

    // the session ends with the synthetic incident's message
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Read error"), "got: {}", err);

    // consistency state from before the failure is intact
    let record = registry.query("db1.t1", 0).unwrap();
    assert_eq!(record.binlog_pos, 256);
}
