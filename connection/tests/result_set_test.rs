//! Result set framing against a scripted server: column definitions are
//! skipped, rows are collected until EOF, NULL cells survive, and the
//! SHOW helpers parse their fixed columns.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use common::err::TbrError;

use connection::conn::connection::Connection;
use connection::conn::connection_options::ConnectionOptions;

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
    let scramble = [5u8; 20];
    let mut packet = Vec::new();
    packet.push(10u8);
    packet.extend_from_slice(b"5.5.5-10.6.14-MariaDB-log");
    packet.push(0);
    packet.extend_from_slice(&7u32.to_le_bytes());
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

fn row_frame(cells: &[Option<&str>], seq: u8) -> Vec<u8> {
    let mut payload = Vec::new();
    for cell in cells {
        match cell {
            Some(value) => {
                payload.push(value.len() as u8);
                payload.extend_from_slice(value.as_bytes());
            }
            None => payload.push(0xFB),
        }
    }
    frame(&payload, seq)
}

/// Authenticate, then answer each incoming query with the next canned
/// response.
fn scripted_server(responses: Vec<Vec<Vec<u8>>>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(&handshake_frame()).unwrap();
        let _auth = read_client_packet(&mut stream);
        stream.write_all(&ok_frame(2)).unwrap();

        for response in responses {
            let _query = read_client_packet(&mut stream);
            for packet in response {
                stream.write_all(&packet).unwrap();
            }
        }
    });

    addr
}

fn connect_to(addr: std::net::SocketAddr) -> Connection {
    let mut options = ConnectionOptions::default();
    options.hostname = "127.0.0.1".to_string();
    options.port = addr.port();
    options.username = "repl".to_string();
    options.password = "pw".to_string();

    let mut conn = Connection::new(options);
    conn.connect().unwrap();
    conn
}

fn result_set(columns: usize, rows: Vec<Vec<Option<&str>>>) -> Vec<Vec<u8>> {
    let mut packets = vec![frame(&[columns as u8], 1)];
    for _ in 0..columns {
        packets.push(frame(b"\x03def", 2));
    }
    packets.push(eof_frame(3));
    for row in &rows {
        packets.push(row_frame(row, 4));
    }
    packets.push(eof_frame(5));
    packets
}

#[test]
fn rows_and_nulls_come_back() {
    let addr = scripted_server(vec![result_set(
        2,
        vec![
            vec![Some("binlog.000001"), Some("154")],
            vec![Some("binlog.000002"), None],
        ],
    )]);

    let mut conn = connect_to(addr);
    let rows = conn.query("SHOW SOMETHING").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0].as_deref(), Some("binlog.000001"));
    assert_eq!(rows[0][1].as_deref(), Some("154"));
    assert_eq!(rows[1][1], None);
}

#[test]
fn master_status_and_binary_logs_parse() {
    let addr = scripted_server(vec![
        result_set(5, vec![vec![Some("binlog.000007"), Some("667"), None, None, None]]),
        result_set(
            2,
            vec![
                vec![Some("binlog.000006"), Some("1048576")],
                vec![Some("binlog.000007"), Some("667")],
            ],
        ),
    ]);

    let mut conn = connect_to(addr);

    let (file, position) = conn.fetch_master_status().unwrap();
    assert_eq!(file, "binlog.000007");
    assert_eq!(position, 667);

    let logs = conn.fetch_binary_logs().unwrap();
    assert_eq!(
        logs,
        vec![
            ("binlog.000006".to_string(), 1048576),
            ("binlog.000007".to_string(), 667)
        ]
    );
}

#[test]
fn execute_expects_ok_and_surfaces_err() {
    let mut err = vec![0xFFu8];
    err.extend_from_slice(&1193u16.to_le_bytes());
    err.push(b'#');
    err.extend_from_slice(b"HY000");
    err.extend_from_slice(b"Unknown system variable");

    let addr = scripted_server(vec![vec![ok_frame(1)], vec![frame(&err, 1)]]);

    let mut conn = connect_to(addr);
    conn.execute("SET @master_binlog_checksum=@@global.binlog_checksum", "Checksum")
        .unwrap();

    let failure = conn
        .execute("SET @mariadb_slave_capability=4", "Capability")
        .unwrap_err();
    match failure {
        TbrError::CommandFailed(message) => {
            assert!(message.contains("Capability"));
            assert!(message.contains("1193"));
        }
        other => panic!("expected CommandFailed, got {:?}", other),
    }
}
