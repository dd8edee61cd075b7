//! Cryptographic primitives for the container.
//!
//! Provides key derivation, the AES cipher engine, and password digests.

pub mod cipher;
pub mod digest;
pub mod kdf;

pub use cipher::{CipherContext, CipherEngine, CipherMode, Direction};
pub use digest::{ct_eq, password_checksum};
pub use kdf::{KdfDigest, KdfParams};

use crate::error::{Error, Result};
use getrandom::fill;

/// Length of the password checksum (SHA-256 output).
pub const CHECKSUM_LEN: usize = 32;
/// IV length for the chained mode (one AES block).
pub const CBC_IV_LEN: usize = 16;
/// Nonce length for the authenticated mode.
pub const GCM_IV_LEN: usize = 12;
/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;
/// AES block size.
pub const BLOCK_LEN: usize = 16;

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|_| Error::Random)
}

/// Generate a fresh random IV of `len` bytes
pub(crate) fn generate_iv(len: usize) -> Result<Vec<u8>> {
    let mut iv = vec![0u8; len];
    secure_random(&mut iv)?;
    Ok(iv)
}
