//! Single-use download token generation and verification.
//!
//! Only a SHA-256 hash of the token is ever persisted; the plaintext exists
//! exactly once, in the delivery payload handed to recipients. Verification
//! against the stored hash is constant-time.

use rand::{distr::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

/// Length of the plaintext token in characters (~214 bits of entropy).
const TOKEN_LENGTH: usize = 36;

/// A freshly issued download credential: the plaintext to hand out and the
/// hash to persist.
#[derive(Debug, Clone)]
pub struct DownloadToken {
    pub plaintext: String,
    pub hash: String,
}

impl DownloadToken {
    pub fn issue() -> Self {
        let plaintext: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        let hash = hash_token(&plaintext);
        Self { plaintext, hash }
    }
}

/// Hex-encoded SHA-256 digest of a plaintext token.
pub fn hash_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Check a presented plaintext token against a stored hash.
///
/// The digest comparison runs in constant time so callers serving downloads
/// do not leak hash prefixes through response timing.
pub fn verify_token(presented: &str, stored_hash: &str) -> bool {
    constant_time_eq(hash_token(presented).as_bytes(), stored_hash.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
