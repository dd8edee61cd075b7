//! Security levels and encryption settings.

use std::fmt;
use std::str::FromStr;

use crate::crypto::{CipherMode, KdfDigest, KdfParams};
use crate::error::{Error, Result};

/// Predefined key size, salt size and iteration count combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityTier {
    /// 128-bit key, 32-byte salt, 1 000 iterations.
    Minimum,
    /// 192-bit key, 64-byte salt, 10 000 iterations.
    #[default]
    Medium,
    /// 256-bit key, 128-byte salt, 20 000 iterations.
    High,
}

impl SecurityTier {
    pub fn key_len_bits(self) -> u32 {
        match self {
            SecurityTier::Minimum => 128,
            SecurityTier::Medium => 192,
            SecurityTier::High => 256,
        }
    }

    pub fn salt_size(self) -> u32 {
        match self {
            SecurityTier::Minimum => 32,
            SecurityTier::Medium => 64,
            SecurityTier::High => 128,
        }
    }

    pub fn iterations(self) -> u32 {
        match self {
            SecurityTier::Minimum => 1_000,
            SecurityTier::Medium => 10_000,
            SecurityTier::High => 20_000,
        }
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityTier::Minimum => write!(f, "minimum"),
            SecurityTier::Medium => write!(f, "medium"),
            SecurityTier::High => write!(f, "high"),
        }
    }
}

impl FromStr for SecurityTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "minimum" | "min" => Ok(SecurityTier::Minimum),
            "medium" => Ok(SecurityTier::Medium),
            "high" => Ok(SecurityTier::High),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown security tier {other:?}"
            ))),
        }
    }
}

/// Everything an encryptor needs besides the password.
///
/// Always valid once constructed; `with_*` methods return modified copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityConfig {
    key_len_bits: u32,
    salt_size: u32,
    iterations: u32,
    digest: KdfDigest,
    mode: CipherMode,
    compress: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::tier(SecurityTier::default())
    }
}

impl SecurityConfig {
    /// Tier parameters with PBKDF2-HMAC-SHA256, AES-GCM and compression
    /// enabled.
    pub fn tier(tier: SecurityTier) -> Self {
        Self {
            key_len_bits: tier.key_len_bits(),
            salt_size: tier.salt_size(),
            iterations: tier.iterations(),
            digest: KdfDigest::default(),
            mode: CipherMode::Gcm,
            compress: true,
        }
    }

    /// Explicit parameters. Every value must be present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if a value is missing or out of range.
    pub fn custom(
        key_len_bits: Option<u32>,
        iterations: Option<u32>,
        salt_size: Option<u32>,
    ) -> Result<Self> {
        let missing = |name: &str| Error::InvalidConfiguration(format!("{name} is required"));

        let key_len_bits = key_len_bits.ok_or_else(|| missing("key length"))?;
        let iterations = iterations.ok_or_else(|| missing("iteration count"))?;
        let salt_size = salt_size.ok_or_else(|| missing("salt size"))?;

        // same bounds as the KDF enforces
        KdfParams::new(key_len_bits, salt_size, iterations)?;

        Ok(Self {
            key_len_bits,
            salt_size,
            iterations,
            digest: KdfDigest::default(),
            mode: CipherMode::Gcm,
            compress: true,
        })
    }

    pub fn with_digest(self, digest: KdfDigest) -> Self {
        Self { digest, ..self }
    }

    pub fn with_mode(self, mode: CipherMode) -> Self {
        Self { mode, ..self }
    }

    pub fn with_compression(self, compress: bool) -> Self {
        Self { compress, ..self }
    }

    pub fn key_len_bits(&self) -> u32 {
        self.key_len_bits
    }

    pub fn salt_size(&self) -> u32 {
        self.salt_size
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn digest(&self) -> KdfDigest {
        self.digest
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    /// Fresh KDF parameters with an as yet ungenerated salt.
    pub(crate) fn kdf_params(&self) -> Result<KdfParams> {
        Ok(KdfParams::new(self.key_len_bits, self.salt_size, self.iterations)?
            .with_digest(self.digest))
    }
}
