use std::io::{self, Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use sha1::{Digest, Sha1};

use crate::declar::capability_flags::replica_client_flags;
use crate::{MAX_PACKET_SIZE, NULL_TERMINATOR};

/// Handshake response: capabilities u32, max packet u32, charset u8,
/// 23 zero bytes, user NUL string, scramble length u8 + scramble, then
/// the default database as a NUL string. An empty password sends a zero
/// length scramble.
pub struct AuthenticateCommand {
    pub user: String,
    pub password: String,
    pub database: String,
    pub charset: u8,
    /// 20 byte server scramble from the handshake.
    pub server_scramble: Vec<u8>,
}

impl AuthenticateCommand {
    pub fn new(
        user: &str,
        password: &str,
        database: &str,
        charset: u8,
        server_scramble: &[u8],
    ) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
            database: database.to_string(),
            charset,
            server_scramble: server_scramble.to_vec(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, io::Error> {
        let mut vec = Vec::new();
        let mut cursor = Cursor::new(&mut vec);

        cursor.write_u32::<LittleEndian>(replica_client_flags().bits())?;
        cursor.write_u32::<LittleEndian>(MAX_PACKET_SIZE)?;
        cursor.write_u8(self.charset)?;
        cursor.write_all(&[0u8; 23])?;
        cursor.write_all(self.user.as_bytes())?;
        cursor.write_u8(NULL_TERMINATOR)?;

        let scramble = scramble_password(&self.password, &self.server_scramble);
        cursor.write_u8(scramble.len() as u8)?;
        cursor.write_all(&scramble)?;

        cursor.write_all(self.database.as_bytes())?;
        cursor.write_u8(NULL_TERMINATOR)?;

        Ok(vec)
    }
}

/// mysql_native_password reply:
/// `SHA1(password) XOR SHA1(scramble || SHA1(SHA1(password)))`.
/// Empty for an empty password.
pub fn scramble_password(password: &str, server_scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    let stage1 = hasher.finalize_reset();

    hasher.update(stage1);
    let stage2 = hasher.finalize_reset();

    hasher.update(server_scramble);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}
