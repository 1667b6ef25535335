use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::IResult;
use serde::Serialize;

use common::err::TbrResult;

use crate::events::checksum_type::ChecksumType;
use crate::events::event_header::Header;
use crate::utils::{extract_string, finish};

/// Length of the fixed server version field.
const SERVER_VERSION_LEN: usize = 50;

/// First event of every binlog file, describing how to read the rest.
///
/// Payload: binlog_version u16, server version as a 50 byte NUL padded
/// string, created u32, common header length u8, then one post-header
/// length byte per known event type. Servers from 5.6.1 on append a
/// checksum algorithm byte and the event's own CRC32 as the last five
/// bytes; that is where a checksummed stream announces itself.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct FormatDescriptionEvent {
    pub header: Header,

    pub binlog_version: u16,

    pub server_version: String,

    pub created: u32,

    pub common_header_len: u8,

    pub post_header_lens: Vec<u8>,

    /// Checksum algorithm announced for this file, when present.
    pub checksum: Option<ChecksumType>,
}

impl FormatDescriptionEvent {
    pub fn parse(payload: &[u8], header: &Header) -> TbrResult<FormatDescriptionEvent> {
        finish(parse_inner(payload, header), "format description event")
    }
}

fn parse_inner<'a>(input: &'a [u8], header: &Header) -> IResult<&'a [u8], FormatDescriptionEvent> {
    let (i, binlog_version) = le_u16(input)?;
    let (i, version_raw) = take(SERVER_VERSION_LEN)(i)?;
    let (i, created) = le_u32(i)?;
    let (i, common_header_len) = le_u8(i)?;

    // The remainder is the post-header length table, possibly followed
    // by checksum_alg u8 + crc u32. Algorithm bytes are 0 (off) or 1
    // (CRC32); post-header lengths of real events are all larger.
    let (i, rest) = take(i.len())(i)?;
    let (post_header_lens, checksum) = if rest.len() >= 5 && rest[rest.len() - 5] <= 1 {
        let alg = ChecksumType::from_code(rest[rest.len() - 5]);
        (rest[..rest.len() - 5].to_vec(), Some(alg))
    } else {
        (rest.to_vec(), None)
    };

    Ok((
        i,
        FormatDescriptionEvent {
            header: header.clone(),
            binlog_version,
            server_version: extract_string(version_raw),
            created,
            common_header_len,
            post_header_lens,
            checksum,
        },
    ))
}
