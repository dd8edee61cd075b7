//! Stream and file encryption.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::info;

use crate::error::Result;
use crate::pipeline::StreamOptions;
use crate::security::SecurityConfig;
use crate::session::{Opener, Sealer};
use crate::storage::Storage;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // session state stays consistent even if a holder panicked
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encrypts streams into containers under one derived key.
///
/// The key is derived once in [`FileEncryptor::new`]; every call draws a
/// fresh IV. Concurrent calls on one instance are serialized.
pub struct FileEncryptor {
    sealer: Mutex<Sealer>,
}

impl FileEncryptor {
    /// Derives the key for `password`. The password itself is not kept.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty password.
    pub fn new(password: &str, config: SecurityConfig) -> Result<Self> {
        let (sealer, _key) = Sealer::derive(password, &config)?;
        Ok(Self {
            sealer: Mutex::new(sealer),
        })
    }

    /// Writes a complete container for everything readable from `input`.
    ///
    /// Returns the number of plaintext bytes consumed. On failure `output`
    /// may hold a partial container.
    pub fn encrypt<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        options: StreamOptions<'_>,
    ) -> Result<u64> {
        let sealer = lock(&self.sealer);
        let n = sealer.seal(input, output, options)?;
        info!("encrypted {n} bytes with {}", sealer.mode());
        Ok(n)
    }

    /// Encrypts the file at `src` into `dst`.
    ///
    /// `dst` is replaced atomically, so it is left untouched on failure.
    /// Progress uses the source file size unless `options.total_len` is set.
    pub fn encrypt_file(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
        mut options: StreamOptions<'_>,
    ) -> Result<u64> {
        let file = File::open(src.as_ref())?;
        if options.total_len.is_none() {
            options.total_len = Some(file.metadata()?.len());
        }
        let mut input = BufReader::new(file);

        Storage::new(dst.as_ref()).write_atomic(|out| self.encrypt(&mut input, out, options))
    }
}

/// Decrypts containers produced with any parameters.
///
/// Keeps the password so each container's KDF configuration can be honored.
/// The key for the most recent configuration is cached.
pub struct FileDecryptor {
    opener: Mutex<Opener>,
}

impl FileDecryptor {
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty password.
    pub fn new(password: &str) -> Result<Self> {
        Ok(Self {
            opener: Mutex::new(Opener::new(password)?),
        })
    }

    /// Reads a container from `input` and writes the plaintext to `output`.
    ///
    /// Returns the number of plaintext bytes written. `options.total_len`, if
    /// set, is the size of the whole container.
    ///
    /// # Errors
    ///
    /// `InvalidPassword` if the password checksum does not match, before any
    /// key derivation. `AuthenticationFailure` or `PaddingError` if the
    /// ciphertext was modified. `MalformedContainer` / `UnsupportedVersion`
    /// for unreadable headers.
    pub fn decrypt<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        options: StreamOptions<'_>,
    ) -> Result<u64> {
        let n = lock(&self.opener).open(input, output, options)?;
        info!("decrypted {n} bytes");
        Ok(n)
    }

    /// Decrypts the container at `src` into `dst`, replacing `dst` atomically.
    pub fn decrypt_file(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
        mut options: StreamOptions<'_>,
    ) -> Result<u64> {
        let file = File::open(src.as_ref())?;
        if options.total_len.is_none() {
            options.total_len = Some(file.metadata()?.len());
        }
        let mut input = BufReader::new(file);

        Storage::new(dst.as_ref()).write_atomic(|out| self.decrypt(&mut input, out, options))
    }
}
