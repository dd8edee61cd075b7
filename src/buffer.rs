//! In-memory encryption and the opaque string form used by preference stores.

use std::sync::{Mutex, PoisonError};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::pipeline::StreamOptions;
use crate::security::SecurityConfig;
use crate::session::{Opener, Sealer};

struct Session {
    sealer: Sealer,
    opener: Opener,
}

/// Encrypts and decrypts byte buffers.
///
/// One salt and key are derived per instance and reused for every
/// [`encrypt`](BufferCryptor::encrypt). Containers from other instances, or
/// with other parameters, still decrypt; their key is derived on demand.
pub struct BufferCryptor {
    session: Mutex<Session>,
}

impl BufferCryptor {
    pub fn new(password: &str, config: SecurityConfig) -> Result<Self> {
        let (sealer, key) = Sealer::derive(password, &config)?;
        let opener =
            Opener::new(password)?.with_cached_key(sealer.kdf_config(), sealer.digest(), key);
        Ok(Self {
            session: Mutex::new(Session { sealer, opener }),
        })
    }

    /// Returns a complete container for `plaintext`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `plaintext` is empty.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Err(Error::InvalidArgument("data cannot be empty"));
        }
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        let mut container = Vec::with_capacity(plaintext.len() + 128);
        session
            .sealer
            .seal(&mut &plaintext[..], &mut container, StreamOptions::new())?;
        Ok(container)
    }

    pub fn decrypt(&self, container: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        let mut plaintext = Zeroizing::new(Vec::with_capacity(container.len()));
        session
            .opener
            .open(&mut &container[..], &mut *plaintext, StreamOptions::new())?;
        Ok(plaintext)
    }

    /// [`encrypt`](BufferCryptor::encrypt) then base64 (standard alphabet).
    pub fn encrypt_to_opaque_string(&self, plaintext: &str) -> Result<String> {
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes())?))
    }

    /// Reverses [`encrypt_to_opaque_string`](BufferCryptor::encrypt_to_opaque_string).
    ///
    /// # Errors
    ///
    /// Returns `MalformedContainer` if `opaque` is not base64 or the
    /// plaintext is not UTF-8.
    pub fn decrypt_from_opaque_string(&self, opaque: &str) -> Result<Zeroizing<String>> {
        let container = STANDARD
            .decode(opaque.trim())
            .map_err(|e| Error::MalformedContainer(format!("invalid base64: {e}")))?;
        let plaintext = self.decrypt(&container)?;

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| Error::MalformedContainer("decrypted value is not UTF-8".into()))?;
        Ok(Zeroizing::new(text.to_owned()))
    }
}
