use nom::bytes::complete::take;
use nom::number::complete::{le_u32, le_u8};
use nom::IResult;
use serde::Serialize;

use common::err::TbrResult;

use crate::events::event_header::Header;
use crate::utils::{finish, read_fixed_len_string};

pub const USER_VAR_STRING_TYPE: u8 = 0;

/// Binary collation, reported for NULL valued variables.
pub const BINARY_CHARSET: u32 = 63;

/// A user variable referenced by a logged statement.
///
/// Payload: name_len u32, name, is_null u8; when not null: value type u8,
/// charset u32, value_len u32, value bytes (encoding depends on type,
/// kept opaque here).
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct UserVarEvent {
    pub header: Header,

    pub name: String,

    pub is_null: bool,

    pub var_type: u8,

    pub charset: u32,

    pub value: Vec<u8>,
}

impl UserVarEvent {
    pub fn parse(payload: &[u8], header: &Header) -> TbrResult<UserVarEvent> {
        finish(parse_inner(payload, header), "user var event")
    }
}

fn parse_inner<'a>(input: &'a [u8], header: &Header) -> IResult<&'a [u8], UserVarEvent> {
    let (i, name_len) = le_u32(input)?;
    let (i, name) = read_fixed_len_string(i, name_len as usize)?;
    let (i, is_null) = le_u8(i)?;

    if is_null != 0 {
        return Ok((
            i,
            UserVarEvent {
                header: header.clone(),
                name,
                is_null: true,
                var_type: USER_VAR_STRING_TYPE,
                charset: BINARY_CHARSET,
                value: vec![],
            },
        ));
    }

    let (i, var_type) = le_u8(i)?;
    let (i, charset) = le_u32(i)?;
    let (i, value_len) = le_u32(i)?;
    let (i, value) = take(value_len)(i)?;

    Ok((
        i,
        UserVarEvent {
            header: header.clone(),
            name,
            is_null: false,
            var_type,
            charset,
            value: value.to_vec(),
        },
    ))
}
