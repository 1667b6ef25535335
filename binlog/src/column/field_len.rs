use common::err::{Needed, TbrError, TbrResult};

use crate::column::column_type::ColumnType;

/// Bytes used by the leftover digits of a packed decimal group.
const DIG2BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

const DIG_PER_DEC: u16 = 9;

/// On-wire size of one column value inside a row image.
///
/// `meta` is the column's TABLE_MAP metadata word, `field` the row buffer
/// starting at the value. Only the size is computed; values are never
/// decoded. Length-prefixed types read their prefix from `field`.
pub fn value_len(col: ColumnType, meta: u16, field: &[u8]) -> TbrResult<usize> {
    let size = match col {
        ColumnType::Tiny | ColumnType::Year => 1,
        ColumnType::Short => 2,
        ColumnType::Int24 | ColumnType::NewDate | ColumnType::Date | ColumnType::Time => 3,
        ColumnType::Long | ColumnType::Timestamp | ColumnType::Float => 4,
        ColumnType::LongLong | ColumnType::Double | ColumnType::DateTime => 8,
        ColumnType::Null => 0,

        // pre-5.0 packed decimal stores its size in the metadata
        ColumnType::Decimal => (meta & 0xff) as usize,

        ColumnType::NewDecimal => {
            let precision = meta >> 8;
            let scale = meta & 0xff;
            decimal_binary_size(precision, scale)
        }

        ColumnType::String | ColumnType::Enum | ColumnType::Set => {
            // first metadata byte is the real type
            let real_type = ColumnType::try_from((meta >> 8) as u8).unwrap_or(col);
            if real_type == ColumnType::Enum || real_type == ColumnType::Set {
                (meta & 0xff) as usize
            } else {
                1 + read_prefix(field, 1)? as usize
            }
        }

        ColumnType::VarChar => {
            let prefix_len = if meta > 255 { 2 } else { 1 };
            prefix_len + read_prefix(field, prefix_len)? as usize
        }

        ColumnType::Bit => {
            let hi = (meta >> 8) as usize;
            let lo = (meta & 0xff) as usize;
            hi / 8 + usize::from(lo > 0)
        }

        ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Blob
        | ColumnType::Geometry
        | ColumnType::Json => {
            // metadata is the width of the length prefix (1..4)
            let prefix_len = (meta & 0xff) as usize;
            if prefix_len == 0 || prefix_len > 4 {
                return Err(TbrError::MalformedEvent(format!(
                    "Blob length prefix width {} out of range",
                    prefix_len
                )));
            }
            prefix_len + read_prefix(field, prefix_len)? as usize
        }

        // legacy slot reusing the metadata as the size
        ColumnType::VarString => meta as usize,

        // sub-second temporal variants carry their fractional part width
        // in the metadata: base size + ceil(fsp / 2) extra bytes
        ColumnType::Timestamp2 => 4 + fsp_len(meta),
        ColumnType::DateTime2 => 5 + fsp_len(meta),
        ColumnType::Time2 => 3 + fsp_len(meta),
    };
    Ok(size)
}

/// Size of a binary packed decimal with the given precision and scale:
/// each full group of 9 digits costs 4 bytes, the remainder per
/// DIG2BYTES.
fn decimal_binary_size(precision: u16, scale: u16) -> usize {
    let integral = precision.saturating_sub(scale);
    (integral / DIG_PER_DEC) as usize * 4
        + DIG2BYTES[(integral % DIG_PER_DEC) as usize]
        + (scale / DIG_PER_DEC) as usize * 4
        + DIG2BYTES[(scale % DIG_PER_DEC) as usize]
}

fn fsp_len(meta: u16) -> usize {
    ((meta & 0xff) as usize + 1) / 2
}

fn read_prefix(field: &[u8], width: usize) -> TbrResult<u32> {
    if field.len() < width {
        return Err(TbrError::Incomplete(Needed::NoEnoughData));
    }
    let mut value: u32 = 0;
    for (idx, byte) in field[..width].iter().enumerate() {
        value |= (*byte as u32) << (8 * idx);
    }
    Ok(value)
}
