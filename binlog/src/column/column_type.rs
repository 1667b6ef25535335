use num_enum::TryFromPrimitive;
use serde::Serialize;

/// Column type codes as they appear in the TABLE_MAP column type vector.
///
/// ref: https://dev.mysql.com/doc/dev/mysql-server/latest/field__types_8h.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TryFromPrimitive)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    VarChar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    /// Width of this type's entry in the TABLE_MAP per-column metadata
    /// block.
    ///
    /// See https://mariadb.com/kb/en/library/rows_event_v1/#column-data-formats
    pub fn metadata_len(&self) -> usize {
        match self {
            // 1 byte of metadata
            ColumnType::Float
            | ColumnType::Double
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Blob
            | ColumnType::Geometry
            | ColumnType::Json
            | ColumnType::Timestamp2
            | ColumnType::DateTime2
            | ColumnType::Time2 => 1,

            // 2 bytes of metadata
            ColumnType::VarChar
            | ColumnType::Bit
            | ColumnType::NewDecimal
            | ColumnType::Enum
            | ColumnType::Set
            | ColumnType::VarString
            | ColumnType::String => 2,

            _ => 0,
        }
    }

    /// True when the two metadata bytes are packed big endian style
    /// (first byte into the high bits). Applies to the string family
    /// where the first byte carries the real type.
    pub fn metadata_packed_high(&self) -> bool {
        matches!(
            self,
            ColumnType::NewDecimal
                | ColumnType::Enum
                | ColumnType::Set
                | ColumnType::VarString
                | ColumnType::String
        )
    }
}
