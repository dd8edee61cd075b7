use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use hmac::Hmac;
use log::debug;
use pbkdf2::pbkdf2;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use super::secure_random;
use crate::error::{Error, Result};

/// Minimum allowed PBKDF2 iteration count.
pub const PBKDF2_MIN_ITERATIONS: u32 = 1;
/// Maximum allowed PBKDF2 iteration count.
pub const PBKDF2_MAX_ITERATIONS: u32 = 5_000_000;
/// Largest salt accepted, in bytes. Also bounds what a parsed header may ask for.
pub const MAX_SALT_SIZE: u32 = 1024;
/// AES key lengths in bits.
pub const SUPPORTED_KEY_BITS: [u32; 3] = [128, 192, 256];

const CONFIG_SEPARATOR: char = ':';
const CONFIG_FIELDS: usize = 4;

/// Hash function behind the PBKDF2 HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KdfDigest {
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

impl KdfDigest {
    /// Identifier stored in the container flags. SHA-256 is 0 so that
    /// containers written before the selector existed keep their meaning.
    pub(crate) fn id(self) -> u8 {
        match self {
            KdfDigest::Sha256 => 0,
            KdfDigest::Sha1 => 1,
            KdfDigest::Sha512 => 2,
        }
    }

    pub(crate) fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(KdfDigest::Sha256),
            1 => Some(KdfDigest::Sha1),
            2 => Some(KdfDigest::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for KdfDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KdfDigest::Sha1 => write!(f, "SHA1"),
            KdfDigest::Sha256 => write!(f, "SHA256"),
            KdfDigest::Sha512 => write!(f, "SHA512"),
        }
    }
}

impl FromStr for KdfDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(KdfDigest::Sha1),
            "sha256" | "sha-256" => Ok(KdfDigest::Sha256),
            "sha512" | "sha-512" => Ok(KdfDigest::Sha512),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown KDF digest {other:?}"
            ))),
        }
    }
}

/// PBKDF2-HMAC parameters.
///
/// The salt is generated on first use and frozen for the lifetime of the
/// value, so every key derived from one instance shares it. Copies are made
/// with [`KdfParams::try_clone`], which freezes the salt first.
#[derive(Debug)]
pub struct KdfParams {
    key_len_bits: u32,
    salt_size: u32,
    iterations: u32,
    digest: KdfDigest,
    salt: OnceLock<Vec<u8>>,
}

impl PartialEq for KdfParams {
    fn eq(&self, other: &Self) -> bool {
        self.key_len_bits == other.key_len_bits
            && self.salt_size == other.salt_size
            && self.iterations == other.iterations
            && self.digest == other.digest
            && self.salt.get() == other.salt.get()
    }
}

impl Eq for KdfParams {}

impl KdfParams {
    pub fn new(key_len_bits: u32, salt_size: u32, iterations: u32) -> Result<Self> {
        let params = Self {
            key_len_bits,
            salt_size,
            iterations,
            digest: KdfDigest::default(),
            salt: OnceLock::new(),
        };
        params.validate()?;
        Ok(params)
    }

    /// Builds parameters around an existing salt, e.g. one read back from a
    /// container.
    pub fn with_salt(key_len_bits: u32, iterations: u32, salt: Vec<u8>) -> Result<Self> {
        let salt_size = u32::try_from(salt.len())
            .map_err(|_| Error::InvalidConfiguration("salt is too large".into()))?;
        let params = Self {
            key_len_bits,
            salt_size,
            iterations,
            digest: KdfDigest::default(),
            salt: OnceLock::from(salt),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_digest(self, digest: KdfDigest) -> Self {
        Self { digest, ..self }
    }

    /// Returns a copy that shares this instance's salt, generating it first
    /// if needed.
    pub fn try_clone(&self) -> Result<Self> {
        let salt = self.salt()?.to_vec();
        Ok(Self {
            key_len_bits: self.key_len_bits,
            salt_size: self.salt_size,
            iterations: self.iterations,
            digest: self.digest,
            salt: OnceLock::from(salt),
        })
    }

    pub fn key_len_bits(&self) -> u32 {
        self.key_len_bits
    }

    pub fn key_len(&self) -> usize {
        (self.key_len_bits / 8) as usize
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

    pub fn salt_generated(&self) -> bool {
        self.salt.get().is_some()
    }

    /// Returns the salt, generating and freezing it on first call.
    pub fn salt(&self) -> Result<&[u8]> {
        if let Some(salt) = self.salt.get() {
            return Ok(salt);
        }
        let mut fresh = vec![0u8; self.salt_size as usize];
        secure_random(&mut fresh)?;
        // another thread may have won the race; its salt is kept
        Ok(self.salt.get_or_init(|| fresh))
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_KEY_BITS.contains(&self.key_len_bits) {
            return Err(Error::InvalidConfiguration(format!(
                "unsupported key length: {} bits",
                self.key_len_bits
            )));
        }
        if !(PBKDF2_MIN_ITERATIONS..=PBKDF2_MAX_ITERATIONS).contains(&self.iterations) {
            return Err(Error::InvalidConfiguration(format!(
                "PBKDF2 iterations must be in {PBKDF2_MIN_ITERATIONS}..={PBKDF2_MAX_ITERATIONS}, got {}",
                self.iterations
            )));
        }
        if self.salt_size == 0 || self.salt_size > MAX_SALT_SIZE {
            return Err(Error::InvalidConfiguration(format!(
                "salt size must be in 1..={MAX_SALT_SIZE}, got {}",
                self.salt_size
            )));
        }
        Ok(())
    }

    /// Derives `key_len_bits / 8` bytes from `password`.
    pub fn derive_key(&self, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        if password.is_empty() {
            return Err(Error::InvalidArgument("password cannot be empty"));
        }
        self.validate()?;

        let salt = self.salt()?;
        let mut key = Zeroizing::new(vec![0u8; self.key_len()]);

        debug!(
            "deriving {}-bit key with PBKDF2-HMAC-{} ({} iterations, {}-byte salt)",
            self.key_len_bits, self.digest, self.iterations, self.salt_size
        );
        let password = password.as_bytes();
        match self.digest {
            KdfDigest::Sha1 => pbkdf2::<Hmac<Sha1>>(password, salt, self.iterations, &mut key),
            KdfDigest::Sha256 => pbkdf2::<Hmac<Sha256>>(password, salt, self.iterations, &mut key),
            KdfDigest::Sha512 => pbkdf2::<Hmac<Sha512>>(password, salt, self.iterations, &mut key),
        }
        .map_err(|e| Error::InvalidConfiguration(format!("PBKDF2 failed: {e}")))?;

        Ok(key)
    }

    /// Serializes as `key_len_bits:salt_size:iterations:hex(salt)`.
    ///
    /// Freezes the salt if it has not been generated yet.
    pub fn to_config_string(&self) -> Result<String> {
        let salt = self.salt()?;
        Ok(format!(
            "{}{CONFIG_SEPARATOR}{}{CONFIG_SEPARATOR}{}{CONFIG_SEPARATOR}{}",
            self.key_len_bits,
            self.salt_size,
            self.iterations,
            hex::encode(salt)
        ))
    }

    /// Parses the output of [`KdfParams::to_config_string`].
    ///
    /// The digest is not part of the string; the result uses the default
    /// and callers apply the stored one with [`KdfParams::with_digest`].
    pub fn parse(config: &str) -> Result<Self> {
        let parts: Vec<&str> = config.split(CONFIG_SEPARATOR).collect();
        if parts.len() != CONFIG_FIELDS {
            return Err(Error::MalformedConfig(format!(
                "expected {CONFIG_FIELDS} fields, found {}",
                parts.len()
            )));
        }

        let number = |field: &str, name: &str| -> Result<u32> {
            field
                .parse::<u32>()
                .map_err(|_| Error::MalformedConfig(format!("{name} is not a number: {field:?}")))
        };
        let key_len_bits = number(parts[0], "key length")?;
        let salt_size = number(parts[1], "salt size")?;
        let iterations = number(parts[2], "iterations")?;

        if salt_size > MAX_SALT_SIZE {
            return Err(Error::MalformedConfig(format!("salt size {salt_size} too large")));
        }
        let salt = hex::decode(parts[3])
            .map_err(|e| Error::MalformedConfig(format!("salt is not valid hex: {e}")))?;
        if salt.len() != salt_size as usize {
            return Err(Error::MalformedConfig(format!(
                "salt is {} bytes, header says {salt_size}",
                salt.len()
            )));
        }

        Self::with_salt(key_len_bits, iterations, salt)
    }
}
