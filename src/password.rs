//! Salted password digests. Stored as lowercase hex of
//! `sha256(salt || ":" || password)`.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

pub const MIN_LEN: usize = 8;

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest.iter() {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

pub fn verify_password(salt: &str, stored_hash: &str, candidate: &str) -> bool {
    let computed = hash_password(salt, candidate);
    // Compare every byte so timing does not leak the matching prefix.
    computed.len() == stored_hash.len()
        && computed
            .bytes()
            .zip(stored_hash.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
