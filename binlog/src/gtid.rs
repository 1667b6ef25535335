use std::fmt;

use serde::{Deserialize, Serialize};

use common::err::{TbrError, TbrResult};

/// Size of the encoded MySQL GTID sent in COM_BINLOG_DUMP_GTID:
/// a 16 byte SID followed by the sequence number as u64.
pub const MYSQL_GTID_ENCODED_LEN: usize = 24;

/// Upstream server flavor, classified from the handshake server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerType {
    Unknown = 0,
    MariaDb = 1,
    MySql = 2,
}

impl ServerType {
    /// Classification rule: a `maria` substring anywhere in the version
    /// string means MariaDB, anything else is treated as MySQL.
    pub fn from_server_version(version: &str) -> ServerType {
        if version.to_ascii_lowercase().contains("maria") {
            ServerType::MariaDb
        } else {
            ServerType::MySql
        }
    }

    pub fn from_code(code: i32) -> ServerType {
        match code {
            1 => ServerType::MariaDb,
            2 => ServerType::MySql,
            _ => ServerType::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerType::MariaDb => "MariaDB",
            ServerType::MySql => "MySQL",
            ServerType::Unknown => "Unknown",
        }
    }
}

/// Global transaction identifier, tagged by dialect.
///
/// A default constructed value has `real == false`, which tells the
/// listener to fall back to file + offset positioning. The canonical
/// string form (`domain-server-sequence` for MariaDB, `hexsid:sequence`
/// for MySQL) is the stable identifier reported to operators and stored
/// in the metadata tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gtid {
    real: bool,
    repr: GtidRepr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum GtidRepr {
    MariaDb {
        domain_id: u32,
        server_id: u32,
        sequence: u64,
    },
    MySql {
        sid: [u8; 16],
        sequence: u64,
    },
}

/// Equality is defined on (dialect, bytes); the `real` flag is a validity
/// marker and does not participate.
impl PartialEq for Gtid {
    fn eq(&self, other: &Self) -> bool {
        self.repr == other.repr
    }
}

impl Eq for Gtid {}

impl Default for Gtid {
    fn default() -> Self {
        Gtid {
            real: false,
            repr: GtidRepr::MariaDb {
                domain_id: 0,
                server_id: 0,
                sequence: 0,
            },
        }
    }
}

impl Gtid {
    pub fn mariadb(domain_id: u32, server_id: u32, sequence: u64) -> Gtid {
        Gtid {
            real: true,
            repr: GtidRepr::MariaDb {
                domain_id,
                server_id,
                sequence,
            },
        }
    }

    pub fn mysql(sid: [u8; 16], sequence: u64) -> Gtid {
        Gtid {
            real: true,
            repr: GtidRepr::MySql { sid, sequence },
        }
    }

    /// An unset GTID makes the listener dump from file + offset instead.
    pub fn is_real(&self) -> bool {
        self.real
    }

    pub fn server_type(&self) -> ServerType {
        match self.repr {
            GtidRepr::MariaDb { .. } => ServerType::MariaDb,
            GtidRepr::MySql { .. } => ServerType::MySql,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self.repr {
            GtidRepr::MariaDb { sequence, .. } => sequence,
            GtidRepr::MySql { sequence, .. } => sequence,
        }
    }

    /// Canonical string form.
    pub fn string(&self) -> String {
        match &self.repr {
            GtidRepr::MariaDb {
                domain_id,
                server_id,
                sequence,
            } => format!("{}-{}-{}", domain_id, server_id, sequence),
            GtidRepr::MySql { sid, sequence } => {
                format!("{}:{}", hex::encode(sid), sequence)
            }
        }
    }

    /// Wire form: the MariaDB dialect travels as its text form inside
    /// `SET @slave_connect_state`, the MySQL dialect as the 24 byte
    /// SID + sequence blob of COM_BINLOG_DUMP_GTID.
    pub fn encoded(&self) -> Vec<u8> {
        match &self.repr {
            GtidRepr::MariaDb { .. } => self.string().into_bytes(),
            GtidRepr::MySql { sid, sequence } => {
                let mut out = Vec::with_capacity(MYSQL_GTID_ENCODED_LEN);
                out.extend_from_slice(sid);
                out.extend_from_slice(&sequence.to_le_bytes());
                out
            }
        }
    }

    /// Parse the MariaDB `domain-server-sequence` form.
    pub fn parse_mariadb(text: &str) -> TbrResult<Gtid> {
        let mut parts = text.split('-');
        let (domain, server, sequence) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(d), Some(s), Some(n), None) => (d, s, n),
            _ => {
                return Err(TbrError::Config(format!(
                    "Not a MariaDB gtid (expected D-S-N): {}",
                    text
                )))
            }
        };
        Ok(Gtid::mariadb(
            domain.parse()?,
            server.parse()?,
            sequence.parse()?,
        ))
    }

    /// Parse the MySQL `hexsid:sequence` form.
    pub fn parse_mysql(text: &str) -> TbrResult<Gtid> {
        let (sid_hex, seq) = text.split_once(':').ok_or_else(|| {
            TbrError::Config(format!("Not a MySQL gtid (expected sid:N): {}", text))
        })?;
        let raw = hex::decode(sid_hex)
            .map_err(|e| TbrError::Config(format!("Bad MySQL gtid sid {}: {}", sid_hex, e)))?;
        if raw.len() != 16 {
            return Err(TbrError::Config(format!(
                "MySQL gtid sid must be 16 bytes, got {}",
                raw.len()
            )));
        }
        let mut sid = [0u8; 16];
        sid.copy_from_slice(&raw);
        Ok(Gtid::mysql(sid, seq.parse()?))
    }

    /// Rebuild a MySQL GTID from its 24 byte wire form.
    pub fn from_mysql_encoded(bytes: &[u8]) -> TbrResult<Gtid> {
        if bytes.len() != MYSQL_GTID_ENCODED_LEN {
            return Err(TbrError::MalformedEvent(format!(
                "Encoded MySQL gtid must be {} bytes, got {}",
                MYSQL_GTID_ENCODED_LEN,
                bytes.len()
            )));
        }
        let mut sid = [0u8; 16];
        sid.copy_from_slice(&bytes[..16]);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&bytes[16..24]);
        Ok(Gtid::mysql(sid, u64::from_le_bytes(seq)))
    }

    /// Parse the canonical string form of the given dialect.
    pub fn parse(server_type: ServerType, text: &str) -> TbrResult<Gtid> {
        match server_type {
            ServerType::MariaDb => Gtid::parse_mariadb(text),
            ServerType::MySql => Gtid::parse_mysql(text),
            ServerType::Unknown => Err(TbrError::Config(format!(
                "Cannot parse gtid {} for unknown server type",
                text
            ))),
        }
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string())
    }
}
