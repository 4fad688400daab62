//! Tenant credential generation.

use rand::{rngs::OsRng, RngCore};

/// A freshly generated credential pair.
///
/// The access key is the public 32-character identifier (hex of 16 random
/// bytes, matching the `[a-z0-9]{32}` path shape); the secret key is the
/// 64-character shared secret.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub access_key: String,
    pub secret_key: String,
}

/// Generates a credential pair from the OS random source.
#[must_use]
pub fn generate_key_pair() -> GeneratedKey {
    let mut access = [0u8; 16];
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut access);
    OsRng.fill_bytes(&mut secret);
    GeneratedKey { access_key: hex::encode(access), secret_key: hex::encode(secret) }
}
