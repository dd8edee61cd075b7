//! Password-based encryption of files, streams and buffers.
//!
//! Keys are derived with PBKDF2 (HMAC-SHA256 unless configured otherwise) and
//! data is encrypted with AES (GCM or CBC), optionally deflated first. Every
//! output is a self-describing container: the header carries the KDF
//! parameters, IV and a password checksum, so only the password is needed to
//! decrypt.
//!
//! ```no_run
//! let container = pwcrypt::encrypt("correct horse battery staple", b"hello world")?;
//! let plaintext = pwcrypt::decrypt("correct horse battery staple", &container)?;
//! assert_eq!(&plaintext[..], b"hello world");
//! # Ok::<(), pwcrypt::Error>(())
//! ```

mod buffer;
pub mod crypto;
mod error;
mod file;
pub mod format;
pub mod pipeline;
mod security;
mod session;
mod storage;

pub use crate::buffer::BufferCryptor;
pub use crate::crypto::{CipherMode, KdfDigest, KdfParams};
pub use crate::error::{Error, Result};
pub use crate::file::{FileDecryptor, FileEncryptor};
pub use crate::format::ContainerHeader;
pub use crate::pipeline::StreamOptions;
pub use crate::security::{SecurityConfig, SecurityTier};
pub use crate::storage::Storage;

use zeroize::Zeroizing;

/// Settings used by [`encrypt`]: medium tier, AES-GCM, no compression.
pub fn default_config() -> SecurityConfig {
    SecurityConfig::tier(SecurityTier::Medium)
        .with_mode(CipherMode::Gcm)
        .with_compression(false)
}

/// Encrypts `plaintext` into a container with [`default_config`].
///
/// # Errors
///
/// Returns `InvalidArgument` if the password or the plaintext is empty.
pub fn encrypt(password: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    BufferCryptor::new(password, default_config())?.encrypt(plaintext)
}

/// Decrypts a container produced by any pwcrypt encryptor.
///
/// # Errors
///
/// Returns `InvalidPassword` if the password does not match, and
/// `AuthenticationFailure`, `PaddingError` or `MalformedContainer` if the
/// container is damaged.
pub fn decrypt(password: &str, container: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let mut plaintext = Zeroizing::new(Vec::with_capacity(container.len()));
    FileDecryptor::new(password)?.decrypt(
        &mut &container[..],
        &mut *plaintext,
        StreamOptions::new(),
    )?;
    Ok(plaintext)
}
