use nom::bytes::complete::take;
use nom::number::complete::le_u16;
use nom::IResult;
use serde::Serialize;

use common::err::{TbrError, TbrResult};

use crate::b_type::LogEventType;
use crate::column::column_type::ColumnType;
use crate::column::field_len::value_len;
use crate::events::event_header::Header;
use crate::events::protocol::table_map_event::TableMapEvent;
use crate::utils::{finish, le_u48, read_len_enc_num};

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum RowsKind {
    Write,
    Update,
    Delete,
}

/// Row based replication event: INSERT, UPDATE or DELETE broken into
/// row images. The table is referenced by the table_id established by a
/// preceding TABLE_MAP event.
///
/// Post-header: table_id u48, flags u16, and for the v2 encodings
/// (types 30..32) an extra-data block preceded by its u16 length. Body:
/// length encoded column count, a used-columns bitmap (two of them for
/// UPDATE: before and after image), then the packed row images. Row
/// values are never decoded here; only their sizes are computed to walk
/// the buffer.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct RowsEvent {
    pub header: Header,

    pub kind: RowsKind,

    pub table_id: u64,

    pub flags: u16,

    pub columns_number: u64,

    /// Used-columns bitmap; for UPDATE this covers the before image.
    pub used_columns: Vec<u8>,

    /// Second bitmap of an UPDATE, covering the after image.
    pub used_columns_update: Option<Vec<u8>>,

    /// Raw row images.
    pub rows: Vec<u8>,
}

impl RowsEvent {
    pub fn parse(payload: &[u8], header: &Header, event_type: LogEventType) -> TbrResult<RowsEvent> {
        let kind = match event_type {
            LogEventType::WriteRowsEventV1 | LogEventType::WriteRowsEvent => RowsKind::Write,
            LogEventType::UpdateRowsEventV1 | LogEventType::UpdateRowsEvent => RowsKind::Update,
            LogEventType::DeleteRowsEventV1 | LogEventType::DeleteRowsEvent => RowsKind::Delete,
            other => {
                return Err(TbrError::MalformedEvent(format!(
                    "{:?} is not a rows event",
                    other
                )))
            }
        };
        finish(
            parse_inner(payload, header, kind, event_type.is_rows_v2()),
            "rows event",
        )
    }

    /// Walk the row buffer and return the byte size of every row image,
    /// sized by the column metadata of the given table map. UPDATE
    /// events alternate before and after images.
    pub fn image_sizes(&self, table_map: &TableMapEvent) -> TbrResult<Vec<usize>> {
        let mut sizes = Vec::new();
        let mut cursor = 0usize;
        let mut after_image = false;

        while cursor < self.rows.len() {
            let bitmap = if after_image {
                self.used_columns_update.as_deref().unwrap_or(&self.used_columns)
            } else {
                &self.used_columns
            };
            let size = self.one_image_len(table_map, bitmap, &self.rows[cursor..])?;
            sizes.push(size);
            cursor += size;
            if self.kind == RowsKind::Update {
                after_image = !after_image;
            }
        }

        Ok(sizes)
    }

    fn one_image_len(
        &self,
        table_map: &TableMapEvent,
        used_bitmap: &[u8],
        image: &[u8],
    ) -> TbrResult<usize> {
        let used_count = count_set_bits(used_bitmap, self.columns_number as usize);
        let null_bytes = (used_count + 7) / 8;
        if image.len() < null_bytes {
            return Err(TbrError::MalformedEvent(
                "Row image shorter than its null bitmap".to_string(),
            ));
        }
        let null_bitmap = &image[..null_bytes];
        let mut offset = null_bytes;

        let mut null_idx = 0usize;
        for col in 0..self.columns_number as usize {
            if !bit_is_set(used_bitmap, col) {
                continue;
            }
            let is_null = bit_is_set(null_bitmap, null_idx);
            null_idx += 1;
            if is_null {
                continue;
            }

            let type_byte = *table_map.column_types.get(col).ok_or_else(|| {
                TbrError::MalformedEvent(format!("No column type for column {}", col))
            })?;
            let column_type = ColumnType::try_from(type_byte).map_err(|_| {
                TbrError::MalformedEvent(format!("Unknown column type {}", type_byte))
            })?;
            let meta = table_map.column_metadata.get(col).copied().unwrap_or(0);

            offset += value_len(column_type, meta, self.rows_tail(image, offset)?)?;
        }

        Ok(offset)
    }

    fn rows_tail<'a>(&self, image: &'a [u8], offset: usize) -> TbrResult<&'a [u8]> {
        image.get(offset..).ok_or_else(|| {
            TbrError::MalformedEvent("Row image shorter than its column values".to_string())
        })
    }
}

fn parse_inner<'a>(
    input: &'a [u8],
    header: &Header,
    kind: RowsKind,
    rows_v2: bool,
) -> IResult<&'a [u8], RowsEvent> {
    let (i, table_id) = le_u48(input)?;
    let (i, flags) = le_u16(i)?;

    // v2 extra data, length includes its own two bytes
    let i = if rows_v2 {
        let (i, extra_len) = le_u16(i)?;
        let (i, _) = take(extra_len.saturating_sub(2))(i)?;
        i
    } else {
        i
    };

    let (i, (_, columns_number)) = read_len_enc_num(i)?;
    let bitmap_len = (columns_number as usize + 7) / 8;
    let (i, used_columns) = take(bitmap_len)(i)?;

    let (i, used_columns_update) = if kind == RowsKind::Update {
        let (i, bitmap) = take(bitmap_len)(i)?;
        (i, Some(bitmap.to_vec()))
    } else {
        (i, None)
    };

    let (i, rows) = take(i.len())(i)?;

    Ok((
        i,
        RowsEvent {
            header: header.clone(),
            kind,
            table_id,
            flags,
            columns_number,
            used_columns: used_columns.to_vec(),
            used_columns_update,
            rows: rows.to_vec(),
        },
    ))
}

fn bit_is_set(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .map(|byte| byte & (1 << (index % 8)) != 0)
        .unwrap_or(false)
}

fn count_set_bits(bitmap: &[u8], limit: usize) -> usize {
    (0..limit).filter(|&i| bit_is_set(bitmap, i)).count()
}
