use std::time::Duration;

use common::config::ServerUri;

use crate::SLAVE_SERVER_ID_ENV;

/// Options for one server connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// Default database sent in the auth packet.
    pub database: String,

    /// Server id announced in COM_REGISTER_SLAVE and the dump commands.
    pub slave_server_id: u32,

    /// No timeout on the dump stream; binlog events can be arbitrarily
    /// spaced. Command connections may set one.
    pub read_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            hostname: "127.0.0.1".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            database: "mysql".to_string(),
            slave_server_id: resolve_slave_server_id(1),
            read_timeout: None,
        }
    }
}

impl ConnectionOptions {
    pub fn from_uri(uri: &ServerUri, slave_server_id: u32) -> Self {
        ConnectionOptions {
            hostname: uri.host.clone(),
            port: uri.port,
            username: uri.user.clone(),
            password: uri.password.clone(),
            database: "mysql".to_string(),
            slave_server_id: resolve_slave_server_id(slave_server_id),
            read_timeout: None,
        }
    }
}

/// The environment variable wins over the configured id when it parses
/// as a decimal number.
pub fn resolve_slave_server_id(configured: u32) -> u32 {
    std::env::var(SLAVE_SERVER_ID_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(configured)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_uri() {
        let uri = ServerUri::parse("mysql://repl:pw@db:3307").unwrap();
        let opts = ConnectionOptions::from_uri(&uri, 9);
        assert_eq!(opts.hostname, "db");
        assert_eq!(opts.port, 3307);
        assert_eq!(opts.username, "repl");
        assert_eq!(opts.password, "pw");
        assert_eq!(opts.database, "mysql");
    }
}
