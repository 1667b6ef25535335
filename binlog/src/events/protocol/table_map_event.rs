use nom::bytes::complete::{tag, take};
use nom::error::{Error, ErrorKind};
use nom::number::complete::{le_u16, le_u8};
use nom::{Err, IResult};
use serde::Serialize;

use common::err::TbrResult;

use crate::column::column_type::ColumnType;
use crate::events::event_header::Header;
use crate::utils::{finish, le_u48, read_len_enc_num, read_len_prefixed_string};

/// Table definition for the row events that follow it in the same
/// transaction.
///
/// Post-header: table_id u48, flags u16. Body: database and table name
/// (one byte length prefix each, NUL terminated), length encoded column
/// count, one type byte per column, length encoded metadata block
/// interpreted per column type, then a nullability bitmap of
/// ceil(n_cols / 8) bytes. Servers may append extra metadata which is
/// not interpreted here.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct TableMapEvent {
    pub header: Header,

    pub table_id: u64,

    /// Reserved, always 0 in current servers.
    pub flags: u16,

    pub database_name: String,

    pub table_name: String,

    pub columns_number: u64,

    pub column_types: Vec<u8>,

    /// Per column metadata word, packed as parsed from the wire.
    pub column_metadata: Vec<u16>,

    /// Raw nullability bitmap, little endian bit order.
    pub null_bitmap: Vec<u8>,
}

impl TableMapEvent {
    pub fn parse(payload: &[u8], header: &Header) -> TbrResult<TableMapEvent> {
        finish(parse_inner(payload, header), "table map event")
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database_name, self.table_name)
    }
}

fn parse_inner<'a>(input: &'a [u8], header: &Header) -> IResult<&'a [u8], TableMapEvent> {
    let (i, table_id) = le_u48(input)?;
    let (i, flags) = le_u16(i)?;

    let (i, (_, database_name)) = read_len_prefixed_string(i)?;
    let (i, _) = tag([0u8])(i)?;
    let (i, (_, table_name)) = read_len_prefixed_string(i)?;
    let (i, _) = tag([0u8])(i)?;

    let (i, (_, columns_number)) = read_len_enc_num(i)?;
    let (i, column_types) = take(columns_number)(i)?;

    let (i, (_, metadata_len)) = read_len_enc_num(i)?;
    let (metadata_rest, metadata_block) = take(metadata_len)(i)?;
    let (_, column_metadata) = parse_metadata(metadata_block, column_types)?;

    let mask_len = (columns_number as usize + 7) / 8;
    let (i, null_bitmap) = take(mask_len)(metadata_rest)?;

    Ok((
        i,
        TableMapEvent {
            header: header.clone(),
            table_id,
            flags,
            database_name,
            table_name,
            columns_number,
            column_types: column_types.to_vec(),
            column_metadata,
            null_bitmap: null_bitmap.to_vec(),
        },
    ))
}

/// Interpret the metadata block: 0, 1 or 2 bytes per column depending on
/// its type. Two byte entries of the string family pack the first byte
/// into the high bits (it carries the real type), the plain two byte
/// entries are little endian.
fn parse_metadata<'a>(input: &'a [u8], column_types: &[u8]) -> IResult<&'a [u8], Vec<u16>> {
    let mut metadata = Vec::with_capacity(column_types.len());
    let mut source = input;

    for &type_byte in column_types {
        let column_type = ColumnType::try_from(type_byte)
            .map_err(|_| Err::Failure(Error::new(source, ErrorKind::Tag)))?;

        let meta = match column_type.metadata_len() {
            0 => 0u16,
            1 => {
                let (s, b) = le_u8(source)?;
                source = s;
                b as u16
            }
            2 if column_type.metadata_packed_high() => {
                let (s, hi) = le_u8(source)?;
                let (s, lo) = le_u8(s)?;
                source = s;
                ((hi as u16) << 8) | lo as u16
            }
            _ => {
                let (s, v) = le_u16(source)?;
                source = s;
                v
            }
        };
        metadata.push(meta);
    }

    Ok((source, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_payload(
        table_id: u64,
        db: &str,
        table: &str,
        column_types: &[u8],
        metadata: &[u8],
    ) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&table_id.to_le_bytes()[..6]);
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.push(db.len() as u8);
        payload.extend_from_slice(db.as_bytes());
        payload.push(0);
        payload.push(table.len() as u8);
        payload.extend_from_slice(table.as_bytes());
        payload.push(0);
        payload.push(column_types.len() as u8);
        payload.extend_from_slice(column_types);
        payload.push(metadata.len() as u8);
        payload.extend_from_slice(metadata);
        payload.extend(std::iter::repeat(0u8).take((column_types.len() + 7) / 8));
        payload
    }

    #[test]
    fn parse_simple_table() {
        // db1.t1 (id INT)
        let payload = build_payload(7, "db1", "t1", &[ColumnType::Long as u8], &[]);
        let event = TableMapEvent::parse(&payload, &Header::default()).unwrap();
        assert_eq!(event.table_id, 7);
        assert_eq!(event.qualified_name(), "db1.t1");
        assert_eq!(event.columns_number, 1);
        assert_eq!(event.column_metadata, vec![0]);
        assert_eq!(event.null_bitmap.len(), 1);
    }

    #[test]
    fn parse_metadata_widths() {
        // VARCHAR(100), BLOB, INT: 2 + 1 + 0 metadata bytes
        let types = [ColumnType::VarChar as u8, ColumnType::Blob as u8, ColumnType::Long as u8];
        let metadata = [100u8, 0u8, 2u8];
        let payload = build_payload(9, "shop", "orders", &types, &metadata);
        let event = TableMapEvent::parse(&payload, &Header::default()).unwrap();
        assert_eq!(event.column_metadata, vec![100, 2, 0]);
    }

    #[test]
    fn string_family_metadata_is_packed_high() {
        let types = [ColumnType::String as u8];
        let metadata = [ColumnType::String as u8, 20u8];
        let payload = build_payload(1, "d", "t", &types, &metadata);
        let event = TableMapEvent::parse(&payload, &Header::default()).unwrap();
        assert_eq!(event.column_metadata, vec![((ColumnType::String as u16) << 8) | 20]);
    }

    #[test]
    fn truncated_metadata_is_rejected() {
        let types = [ColumnType::VarChar as u8];
        // metadata block claims 2 bytes but carries none
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u64.to_le_bytes()[..6]);
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&[1, b'd', 0, 1, b't', 0]);
        payload.push(1);
        payload.extend_from_slice(&types);
        payload.push(2);
        assert!(TableMapEvent::parse(&payload, &Header::default()).is_err());
    }
}
