use sha2::{Digest, Sha256};

use super::CHECKSUM_LEN;

/// SHA-256 of the UTF-8 password, stored in the header to reject wrong
/// passwords before the KDF runs.
pub fn password_checksum(password: &str) -> [u8; CHECKSUM_LEN] {
    Sha256::digest(password.as_bytes()).into()
}

/// Compares two byte slices without stopping at the first difference.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
