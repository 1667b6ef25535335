pub mod commands;
pub mod conn;
pub mod declar;
pub mod packet;

/// `u24 payload_length + u8 sequence` preceding every packet.
pub const PACKET_HEADER_SIZE: usize = 4;

/// Payloads of this size continue in the next frame.
pub const MAX_PACKET_PAYLOAD: usize = 0x00ff_ffff;

/// Max packet advertised in the auth reply.
pub const MAX_PACKET_SIZE: u32 = 16_777_216;

pub const NULL_TERMINATOR: u8 = 0;

/// utf8_general_ci, used when the server does not dictate a collation.
pub const UTF8_GENERAL_CI: u8 = 33;

/// Environment override for the replica server id announced to masters.
pub const SLAVE_SERVER_ID_ENV: &str = "TBR_SLAVE_SERVER_ID";
