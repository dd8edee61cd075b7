//! Error types shared by every pwcrypt operation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Empty password, empty data or an otherwise unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// KDF or security parameters outside the supported range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The serialized KDF configuration string could not be parsed.
    #[error("malformed KDF configuration: {0}")]
    MalformedConfig(String),

    /// The container header is truncated, corrupted or inconsistent.
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u8),

    /// Password checksum mismatch, detected before any cipher work.
    #[error("invalid password")]
    InvalidPassword,

    /// Authenticated mode rejected the ciphertext (tampered or wrong key).
    #[error("authentication failed: ciphertext is corrupted or was modified")]
    AuthenticationFailure,

    /// Chained mode produced invalid padding (corrupted data or wrong key).
    #[error("padding error: ciphertext is corrupted or truncated")]
    PaddingError,

    #[error("invalid key length: expected one of 16, 24 or 32 bytes, got {0}")]
    InvalidKey(usize),

    #[error("invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIv { expected: usize, actual: usize },

    #[error("OS random generator unavailable")]
    Random,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
