use bitflags::bitflags;

bitflags! {
    /// Client/server capability bits exchanged during the handshake.
    ///
    /// ref: https://dev.mysql.com/doc/dev/mysql-server/latest/group__group__cs__capabilities__flags.html
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilityFlags: u32 {
        const LONG_PASSWORD = 0x0000_0001;
        const FOUND_ROWS = 0x0000_0002;
        const LONG_FLAG = 0x0000_0004;
        const CONNECT_WITH_DB = 0x0000_0008;
        const NO_SCHEMA = 0x0000_0010;
        const COMPRESS = 0x0000_0020;
        const ODBC = 0x0000_0040;
        const LOCAL_FILES = 0x0000_0080;
        const IGNORE_SPACE = 0x0000_0100;
        const PROTOCOL_41 = 0x0000_0200;
        const INTERACTIVE = 0x0000_0400;
        const SSL = 0x0000_0800;
        const IGNORE_SIGPIPE = 0x0000_1000;
        const TRANSACTIONS = 0x0000_2000;
        const RESERVED = 0x0000_4000;
        const SECURE_CONNECTION = 0x0000_8000;
        const MULTI_STATEMENTS = 0x0001_0000;
        const MULTI_RESULTS = 0x0002_0000;
        const PS_MULTI_RESULTS = 0x0004_0000;
        const PLUGIN_AUTH = 0x0008_0000;
        const CONNECT_ATTRS = 0x0010_0000;
        const PLUGIN_AUTH_LENENC_DATA = 0x0020_0000;
        const CAN_HANDLE_EXPIRED_PASSWORDS = 0x0040_0000;
        const SESSION_TRACK = 0x0080_0000;
        const DEPRECATE_EOF = 0x0100_0000;
        const SSL_VERIFY_SERVER_CERT = 0x4000_0000;
    }
}

/// Capabilities this replica client advertises.
///
/// SSL, compression and the pluggable auth extensions are deliberately
/// left out: the wire client speaks plain TCP and mysql_native_password
/// only, and the 5.6+ CONNECT_ATTRS / PLUGIN_AUTH_LENENC_DATA framings
/// would change the auth packet layout.
pub fn replica_client_flags() -> CapabilityFlags {
    CapabilityFlags::LONG_PASSWORD
        | CapabilityFlags::FOUND_ROWS
        | CapabilityFlags::LONG_FLAG
        | CapabilityFlags::CONNECT_WITH_DB
        | CapabilityFlags::LOCAL_FILES
        | CapabilityFlags::PROTOCOL_41
        | CapabilityFlags::TRANSACTIONS
        | CapabilityFlags::SECURE_CONNECTION
        | CapabilityFlags::MULTI_STATEMENTS
        | CapabilityFlags::MULTI_RESULTS
        | CapabilityFlags::PS_MULTI_RESULTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_capabilities_stay_off() {
        let flags = replica_client_flags();
        assert!(!flags.contains(CapabilityFlags::SSL));
        assert!(!flags.contains(CapabilityFlags::COMPRESS));
        assert!(!flags.contains(CapabilityFlags::SSL_VERIFY_SERVER_CERT));
        assert!(!flags.contains(CapabilityFlags::PLUGIN_AUTH));
        assert!(!flags.contains(CapabilityFlags::CONNECT_ATTRS));
        assert!(!flags.contains(CapabilityFlags::PLUGIN_AUTH_LENENC_DATA));
    }

    #[test]
    fn required_capabilities_on() {
        let flags = replica_client_flags();
        assert!(flags.contains(CapabilityFlags::PROTOCOL_41));
        assert!(flags.contains(CapabilityFlags::SECURE_CONNECTION));
    }
}
