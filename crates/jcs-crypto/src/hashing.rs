//! SHA-256 and HMAC-SHA256 helpers

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Size of a SHA-256 output in bytes
pub const SHA256_BYTE_SIZE: usize = 32;

/// Hex-encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// HMAC-SHA256 of `data` under `key`
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; SHA256_BYTE_SIZE] {
    let tag = new_mac(key).chain_update(data).finalize().into_bytes();
    let mut out = [0u8; SHA256_BYTE_SIZE];
    out.copy_from_slice(&tag);
    out
}

/// Check `expected` against HMAC-SHA256(key, data) in constant time
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
    new_mac(key).chain_update(data).verify_slice(expected).is_ok()
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length")
}
