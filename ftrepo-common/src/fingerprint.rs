//! Content fingerprinting
//!
//! Fingerprints are lowercase hex SHA-256 digests. Text is normalized before
//! hashing so that line-ending differences between sources do not produce
//! distinct fingerprints for the same announcement.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Normalize free text: CRLF/CR become LF, surrounding whitespace is trimmed
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Fingerprint of a text blob (normalized, then hashed)
pub fn fingerprint_text(text: &str) -> String {
    sha256_hex(normalize_text(text).as_bytes())
}
