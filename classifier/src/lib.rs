//! Query classifier interface consumed by routers on the client query
//! path. Maps a COM_QUERY packet onto a type mask (how the statement may
//! be routed), an operation, referenced tables/databases/fields, and a
//! canonical form with literals replaced by `?`.

pub mod cache;
pub mod canonical;
pub mod statement;

use bitflags::bitflags;
use serde::Serialize;
use thiserror::Error;

pub use cache::{CachingClassifier, ClassifierCache};
pub use canonical::canonicalize;
pub use statement::StatementClassifier;

/// COM_QUERY command byte preceding the statement text in a client
/// packet.
pub const COM_QUERY: u8 = 0x03;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Not a COM_QUERY packet")]
    NotAQuery,
    #[error("Statement is not valid UTF-8")]
    InvalidEncoding,
}

bitflags! {
    /// What a statement does, as routing-relevant bits. More than one
    /// bit may be set; callers test with bitwise AND, never equality.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeMask: u32 {
        /// Reads non-database data, executable anywhere.
        const LOCAL_READ          = 0x000001;
        const READ                = 0x000002;
        /// Master data will be modified.
        const WRITE               = 0x000004;
        const MASTER_READ         = 0x000008;
        const SESSION_WRITE       = 0x000010;
        const USERVAR_WRITE       = 0x000020;
        const USERVAR_READ        = 0x000040;
        const SYSVAR_READ         = 0x000080;
        const GSYSVAR_READ        = 0x000200;
        const GSYSVAR_WRITE       = 0x000400;
        const BEGIN_TRX           = 0x000800;
        const ENABLE_AUTOCOMMIT   = 0x001000;
        const DISABLE_AUTOCOMMIT  = 0x002000;
        const ROLLBACK            = 0x004000;
        const COMMIT              = 0x008000;
        const PREPARE_NAMED_STMT  = 0x010000;
        const PREPARE_STMT        = 0x020000;
        const EXEC_STMT           = 0x040000;
        const CREATE_TMP_TABLE    = 0x080000;
        const READ_TMP_TABLE      = 0x100000;
        const SHOW_DATABASES      = 0x200000;
        const SHOW_TABLES         = 0x400000;
        const DEALLOC_PREPARE     = 0x1000000;
    }
}

bitflags! {
    /// Hint of what to collect during parse. Purely an optimization
    /// hint: later calls may still retrieve anything, the classifier
    /// reparses transparently when needed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CollectFlags: u32 {
        const TABLES    = 0x01;
        const DATABASES = 0x02;
        const FIELDS    = 0x04;
        const FUNCTIONS = 0x08;
    }
}

impl CollectFlags {
    /// Only what every router needs.
    pub const ESSENTIALS: CollectFlags = CollectFlags::empty();
}

/// Outcome of parsing a statement. `Invalid` means the classifier could
/// not recognize it; callers should fall back to WRITE routing to be
/// safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseResult {
    Invalid,
    Tokenized,
    PartiallyParsed,
    Parsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operation {
    Undefined,
    Alter,
    Call,
    ChangeDb,
    Create,
    Delete,
    Drop,
    Execute,
    Explain,
    Grant,
    Insert,
    Load,
    LoadLocal,
    Revoke,
    Select,
    Show,
    Truncate,
    Update,
}

/// Statement dialect assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum SqlMode {
    #[default]
    Default,
    Oracle,
}

/// A column reference, optionally qualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRef {
    pub db: Option<String>,
    pub table: Option<String>,
    pub column: String,
}

/// A function call and the fields it touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionRef {
    pub name: String,
    pub fields: Vec<FieldRef>,
}

/// The classifier contract. Implementations keep per-thread state (sql
/// mode, server version); routers own one classifier per thread.
pub trait QueryClassifier {
    fn parse(&mut self, packet: &[u8], collect: CollectFlags) -> ParseResult;

    fn type_mask(&mut self, packet: &[u8]) -> TypeMask;

    fn operation(&mut self, packet: &[u8]) -> Operation;

    /// Referenced table names, `db.table` qualified when requested and
    /// known.
    fn tables(&mut self, packet: &[u8], qualified: bool) -> Vec<String>;

    fn databases(&mut self, packet: &[u8]) -> Vec<String>;

    fn fields(&mut self, packet: &[u8]) -> Vec<FieldRef>;

    fn functions(&mut self, packet: &[u8]) -> Vec<FunctionRef>;

    /// The statement with literals replaced by `?`.
    fn canonical(&mut self, packet: &[u8]) -> String;

    fn has_where_or_using_clause(&mut self, packet: &[u8]) -> bool;

    /// `PREPARE name FROM ...`: the statement name.
    fn prepare_name(&mut self, packet: &[u8]) -> Option<String>;

    /// `PREPARE name FROM '...'`: the inner statement as a COM_QUERY
    /// packet.
    fn preparable_statement(&mut self, packet: &[u8]) -> Option<Vec<u8>>;

    fn created_table_name(&mut self, packet: &[u8]) -> Option<String>;

    fn is_drop_table(&mut self, packet: &[u8]) -> bool;

    fn set_sql_mode(&mut self, mode: SqlMode);

    fn sql_mode(&self) -> SqlMode;

    /// `major * 10000 + minor * 100 + patch`.
    fn set_server_version(&mut self, version: u64);

    fn server_version(&self) -> u64;
}

/// Statement text of a COM_QUERY packet.
pub fn statement_text(packet: &[u8]) -> Result<&str, ClassifierError> {
    if packet.first() != Some(&COM_QUERY) {
        return Err(ClassifierError::NotAQuery);
    }
    std::str::from_utf8(&packet[1..]).map_err(|_| ClassifierError::InvalidEncoding)
}

/// Build a COM_QUERY packet from statement text.
pub fn query_packet(sql: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(1 + sql.len());
    packet.push(COM_QUERY);
    packet.extend_from_slice(sql.as_bytes());
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_mask_is_tested_bitwise() {
        let mask = TypeMask::READ | TypeMask::USERVAR_READ;
        assert!(mask.intersects(TypeMask::READ));
        assert!(!mask.intersects(TypeMask::WRITE));
    }

    #[test]
    fn packet_round_trip() {
        let packet = query_packet("SELECT 1");
        assert_eq!(statement_text(&packet).unwrap(), "SELECT 1");
        assert!(matches!(
            statement_text(&[0x16, b'x']),
            Err(ClassifierError::NotAQuery)
        ));
    }
}
