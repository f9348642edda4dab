//! One-way password hashing and constant-effort verification.
//!
//! Digest format: `<salt-hex>$<hash-hex>`, where the hash is iterated
//! SHA-256 (100k rounds) over salt + secret.
//!
//! Secrets are treated as byte sequences and truncated to their first 72
//! bytes before hashing — a fixed policy applied identically at hash and
//! verify time, so secrets differing only beyond byte 72 compare as equal.
//! Verification returns `false` on mismatch or malformed digest; it never
//! errors. This module has no knowledge of users or sessions.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Maximum number of secret bytes fed to the hash.
pub const MAX_SECRET_BYTES: usize = 72;

/// Salt byte length (hex-encoded in the digest).
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for key stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// Separator between the salt and hash segments of a digest.
const DIGEST_SEPARATOR: char = '$';

/// Hash a secret with a fresh random salt.
pub fn hash_secret(secret: &str) -> String {
    let salt = generate_salt();
    let hash = stretch(secret, &salt);
    format!("{salt}{DIGEST_SEPARATOR}{hash}")
}

/// Verify a secret against a stored digest. Returns `false` on mismatch or
/// if the digest is malformed.
pub fn verify_secret(secret: &str, digest: &str) -> bool {
    let Some((salt, expected)) = digest.split_once(DIGEST_SEPARATOR) else {
        return false;
    };
    let attempt = stretch(secret, salt);
    constant_time_eq(attempt.as_bytes(), expected.as_bytes())
}

/// Burn the same effort as a real verification. Called on login for unknown
/// usernames so the response time does not reveal whether a user exists.
pub fn dummy_verify(secret: &str) {
    let _ = stretch(secret, "00000000000000000000000000000000");
}

/// Iterated hash over salt + truncated secret.
fn stretch(secret: &str, salt: &str) -> String {
    let secret_bytes = truncated(secret);

    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(secret_bytes);
    let mut result = hash.finalize();

    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

/// First 72 bytes of the secret. Applied on both the hash and verify paths;
/// truncating only one of them would lock out users with long secrets.
fn truncated(secret: &str) -> &[u8] {
    let bytes = secret.as_bytes();
    &bytes[..bytes.len().min(MAX_SECRET_BYTES)]
}

/// Generate a random salt (hex-encoded).
fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time byte comparison to prevent timing attacks.
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
