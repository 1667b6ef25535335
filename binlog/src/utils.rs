#![allow(dead_code)]

use nom::{
    bytes::complete::{take, take_till},
    combinator::map,
    error::{Error, ErrorKind},
    number::complete::{le_u16, le_u24, le_u64, le_u8},
    Err, IResult,
};

use common::err::{Needed, TbrError, TbrResult};

/// extract a string from input, stopping at the first NUL if any
pub fn extract_string(input: &[u8]) -> String {
    let null_end = input.iter().position(|&c| c == b'\0').unwrap_or(input.len());
    String::from_utf8_lossy(&input[0..null_end]).to_string()
}

/// parse a length encoded int, returns (used_bytes, value)
///
/// ref: https://dev.mysql.com/doc/internals/en/integer.html#packet-Protocol::LengthEncodedInteger
///
/// 0xfb marks SQL NULL in a row context and 0xff is never a valid first
/// byte of a length; both fail here, callers that expect NULL check the
/// first byte before calling.
pub fn read_len_enc_num(input: &[u8]) -> IResult<&[u8], (usize, u64)> {
    if input.is_empty() {
        return Err(Err::Incomplete(nom::Needed::new(1)));
    }
    match input[0] {
        // 0 -- 250: the byte is the value
        0..=0xfa => map(le_u8, |num: u8| (1, num as u64))(input),
        // 252: u16 follows
        0xfc => {
            let (i, _) = take(1usize)(input)?;
            map(le_u16, |num: u16| (3, num as u64))(i)
        }
        // 253: u24 follows
        0xfd => {
            let (i, _) = take(1usize)(input)?;
            map(le_u24, |num: u32| (4, num as u64))(i)
        }
        // 254: u64 follows
        0xfe => {
            let (i, _) = take(1usize)(input)?;
            map(le_u64, |v: u64| (9, v))(i)
        }
        // 251 (NULL marker) and 255 (ERR/undefined) are protocol
        // violations where a length is required
        _ => Err(Err::Failure(Error::new(input, ErrorKind::Tag))),
    }
}

/// encode a value in length encoded form (1, 3, 4 or 9 bytes)
pub fn write_len_enc_num(value: u64) -> Vec<u8> {
    if value < 251 {
        vec![value as u8]
    } else if value < 65536 {
        let mut out = vec![0xfc];
        out.extend_from_slice(&(value as u16).to_le_bytes());
        out
    } else if value < 16777216 {
        let mut out = vec![0xfd];
        out.extend_from_slice(&(value as u32).to_le_bytes()[0..3]);
        out
    } else {
        let mut out = vec![0xfe];
        out.extend_from_slice(&value.to_le_bytes());
        out
    }
}

/// parse a length encoded string
///
/// ref: https://dev.mysql.com/doc/internals/en/string.html#packet-Protocol::LengthEncodedString
pub fn read_len_enc_string(input: &[u8]) -> IResult<&[u8], String> {
    let (i, (_, str_len)) = read_len_enc_num(input)?;
    map(take(str_len), |s: &[u8]| {
        String::from_utf8_lossy(s).to_string()
    })(i)
}

/// parse a null terminated string, consuming the terminator
///
/// ref: https://dev.mysql.com/doc/internals/en/string.html#packet-Protocol::NulTerminatedString
pub fn read_null_term_string(input: &[u8]) -> IResult<&[u8], String> {
    let (i, ret) = map(take_till(|c: u8| c == 0x00), |s| {
        String::from_utf8_lossy(s).to_string()
    })(input)?;
    let (i, _) = take(1usize)(i)?;
    Ok((i, ret))
}

/// parse exactly `len` bytes as a string, no terminator
pub fn read_fixed_len_string(input: &[u8], len: usize) -> IResult<&[u8], String> {
    map(take(len), |s: &[u8]| {
        String::from_utf8_lossy(s).to_string()
    })(input)
}

/// parse a string prefixed by a one byte length
pub fn read_len_prefixed_string(input: &[u8]) -> IResult<&[u8], (u8, String)> {
    let (i, len) = le_u8(input)?;
    map(take(len), move |s: &[u8]| {
        (len, String::from_utf8_lossy(s).to_string())
    })(i)
}

/// parse a 6 byte little endian integer (table ids)
pub fn le_u48(input: &[u8]) -> IResult<&[u8], u64> {
    map(take(6usize), |raw: &[u8]| {
        let mut filled = [0u8; 8];
        filled[..6].copy_from_slice(raw);
        u64::from_le_bytes(filled)
    })(input)
}

/// Run a nom parser to completion and translate its failure modes into
/// the core error kinds.
pub fn finish<T>(result: IResult<&[u8], T>, what: &str) -> TbrResult<T> {
    match result {
        Ok((_, value)) => Ok(value),
        Err(Err::Incomplete(_)) => Err(TbrError::Incomplete(Needed::NoEnoughData)),
        Err(Err::Error(e)) | Err(Err::Failure(e)) => Err(TbrError::MalformedEvent(format!(
            "{}: unparsable at {} trailing bytes ({:?})",
            what,
            e.input.len(),
            e.code
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_enc_num_widths() {
        // width = 1, 3, 4 or 9 depending on the value
        for (value, width) in [
            (0u64, 1usize),
            (250, 1),
            (251, 3),
            (65535, 3),
            (65536, 4),
            (16777215, 4),
            (16777216, 9),
            (u64::MAX, 9),
        ] {
            let encoded = write_len_enc_num(value);
            assert_eq!(encoded.len(), width, "value {}", value);
            let (rest, (used, decoded)) = read_len_enc_num(&encoded).unwrap();
            assert!(rest.is_empty());
            assert_eq!(used, width);
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn len_enc_num_rejects_markers() {
        assert!(read_len_enc_num(&[0xfb]).is_err());
        assert!(read_len_enc_num(&[0xff]).is_err());
    }

    #[test]
    fn null_term_string() {
        let (rest, s) = read_null_term_string(b"hello\0world").unwrap();
        assert_eq!(s, "hello");
        assert_eq!(rest, b"world");
    }

    #[test]
    fn len_prefixed_string() {
        let (rest, (len, s)) = read_len_prefixed_string(b"\x03abcxyz").unwrap();
        assert_eq!(len, 3);
        assert_eq!(s, "abc");
        assert_eq!(rest, b"xyz");
    }

    #[test]
    fn u48_le() {
        let (_, v) = le_u48(&[0x07, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(v, 7);
        let (_, v) = le_u48(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).unwrap();
        assert_eq!(v, 0x0000_ffff_ffff_ffff);
    }

    #[test]
    fn extract_string_stops_at_nul() {
        assert_eq!(extract_string(b"abc\0def"), "abc");
        assert_eq!(extract_string(b"abc"), "abc");
    }
}
