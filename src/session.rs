//! Key material shared by the encryptors and decryptors.
//!
//! A [`Sealer`] owns one derived key and writes complete containers; an
//! [`Opener`] keeps the password and re-derives keys as containers demand,
//! caching the most recent one.

use std::io::{Read, Write};

use log::debug;
use zeroize::Zeroizing;

use crate::crypto::{
    CHECKSUM_LEN, CipherEngine, CipherMode, Direction, KdfDigest, generate_iv, password_checksum,
};
use crate::error::{Error, Result};
use crate::format::{self, ContainerHeader};
use crate::pipeline::{self, StreamOptions};
use crate::security::SecurityConfig;

pub(crate) fn check_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::InvalidArgument("password cannot be empty"));
    }
    Ok(())
}

pub(crate) struct Sealer {
    engine: CipherEngine,
    checksum: [u8; CHECKSUM_LEN],
    kdf_config: String,
    digest: KdfDigest,
    compress: bool,
}

impl Sealer {
    /// Derives the session key. The password is not retained.
    pub(crate) fn derive(password: &str, config: &SecurityConfig) -> Result<(Self, Zeroizing<Vec<u8>>)> {
        check_password(password)?;

        let kdf = config.kdf_params()?;
        let key = kdf.derive_key(password)?;
        let sealer = Self {
            engine: CipherEngine::new(&key, config.mode())?,
            checksum: password_checksum(password),
            kdf_config: kdf.to_config_string()?,
            digest: kdf.digest(),
            compress: config.compress(),
        };
        Ok((sealer, key))
    }

    pub(crate) fn kdf_config(&self) -> &str {
        &self.kdf_config
    }

    pub(crate) fn digest(&self) -> KdfDigest {
        self.digest
    }

    pub(crate) fn mode(&self) -> CipherMode {
        self.engine.mode()
    }

    /// Writes header and payload, returning the plaintext byte count.
    pub(crate) fn seal<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        options: StreamOptions<'_>,
    ) -> Result<u64> {
        let mode = self.engine.mode();
        let header = ContainerHeader::new(
            mode,
            self.compress,
            self.checksum,
            generate_iv(mode.iv_len())?,
            self.kdf_config.clone(),
        )?
        .with_kdf_digest(self.digest);
        let header_bytes = header.to_bytes();
        output.write_all(&header_bytes)?;

        let ctx = self.engine.start(Direction::Encrypt, header.iv(), &header_bytes)?;
        pipeline::encrypt_stream(ctx, input, output, self.compress, options)
    }
}

struct CachedKey {
    kdf_config: String,
    digest: KdfDigest,
    key: Zeroizing<Vec<u8>>,
}

pub(crate) struct Opener {
    password: Zeroizing<String>,
    cached: Option<CachedKey>,
}

impl Opener {
    pub(crate) fn new(password: &str) -> Result<Self> {
        check_password(password)?;
        Ok(Self {
            password: Zeroizing::new(password.to_owned()),
            cached: None,
        })
    }

    /// Seeds the cache with a key that is already known for `kdf_config`
    /// and `digest`.
    pub(crate) fn with_cached_key(
        mut self,
        kdf_config: &str,
        digest: KdfDigest,
        key: Zeroizing<Vec<u8>>,
    ) -> Self {
        self.cached = Some(CachedKey {
            kdf_config: kdf_config.to_owned(),
            digest,
            key,
        });
        self
    }

    /// Reads a container from `input` and writes its plaintext to `output`.
    ///
    /// `options.total_len`, when set, counts the whole container including
    /// the header.
    pub(crate) fn open<R: Read, W: Write>(
        &mut self,
        input: &mut R,
        output: &mut W,
        mut options: StreamOptions<'_>,
    ) -> Result<u64> {
        let header = format::read_header(input)?;
        if !format::validate_password(&header, &self.password) {
            return Err(Error::InvalidPassword);
        }

        let key = self.key_for(&header)?;
        let engine = CipherEngine::new(key, header.mode())?;
        let ctx = engine.start(Direction::Decrypt, header.iv(), &header.to_bytes())?;

        options.total_len = options
            .total_len
            .map(|total| total.saturating_sub(header.encoded_len() as u64));
        pipeline::decrypt_stream(ctx, input, output, header.compressed(), options)
    }

    fn key_for(&mut self, header: &ContainerHeader) -> Result<&[u8]> {
        let hit = self
            .cached
            .as_ref()
            .is_some_and(|c| {
                c.kdf_config == header.kdf_config() && c.digest == header.kdf_digest()
            });

        if !hit {
            debug!("key cache miss, deriving key for container");
            let kdf = header.kdf()?;
            let key = kdf.derive_key(&self.password)?;
            self.cached = Some(CachedKey {
                kdf_config: header.kdf_config().to_owned(),
                digest: header.kdf_digest(),
                key,
            });
        }

        match &self.cached {
            Some(cached) => Ok(cached.key.as_slice()),
            None => Err(Error::InvalidConfiguration("no key available".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SecurityTier;

    fn fast_config() -> SecurityConfig {
        SecurityConfig::custom(Some(128), Some(10), Some(16)).unwrap()
    }

    #[test]
    fn sealed_container_opens() {
        let (sealer, _) = Sealer::derive("pw", &fast_config()).unwrap();
        let mut container: Vec<u8> = Vec::new();
        sealer
            .seal(&mut &b"payload"[..], &mut container, StreamOptions::new())
            .unwrap();

        let mut opener = Opener::new("pw").unwrap();
        let mut plain: Vec<u8> = Vec::new();
        let n = opener
            .open(&mut &container[..], &mut plain, StreamOptions::new())
            .unwrap();

        assert_eq!(n, 7);
        assert_eq!(plain, b"payload");
    }

    #[test]
    fn cache_is_keyed_by_config() {
        let (first, _) = Sealer::derive("pw", &fast_config()).unwrap();
        let (second, _) = Sealer::derive("pw", &fast_config()).unwrap();
        assert_ne!(first.kdf_config(), second.kdf_config());

        let mut opener = Opener::new("pw").unwrap();
        for sealer in [&first, &second, &first] {
            let mut container: Vec<u8> = Vec::new();
            sealer
                .seal(&mut &b"x"[..], &mut container, StreamOptions::new())
                .unwrap();
            let mut plain: Vec<u8> = Vec::new();
            opener
                .open(&mut &container[..], &mut plain, StreamOptions::new())
                .unwrap();
            assert_eq!(plain, b"x");
            assert_eq!(
                opener.cached.as_ref().map(|c| c.kdf_config.as_str()),
                Some(sealer.kdf_config())
            );
        }
    }

    #[test]
    fn cache_is_keyed_by_digest() {
        let (sha256, key) = Sealer::derive("pw", &fast_config()).unwrap();
        let mut opener = Opener::new("pw")
            .unwrap()
            .with_cached_key(sha256.kdf_config(), sha256.digest(), key);

        // same config string, different PRF: the cached key must not be used
        let mut container: Vec<u8> = Vec::new();
        sha256
            .seal(&mut &b"x"[..], &mut container, StreamOptions::new())
            .unwrap();
        let (header, offset) = ContainerHeader::from_bytes(&container).unwrap();
        let mut relabelled = header.with_kdf_digest(KdfDigest::Sha512).to_bytes();
        relabelled.extend_from_slice(&container[offset..]);

        let result = opener.open(&mut &relabelled[..], &mut std::io::sink(), StreamOptions::new());
        assert!(matches!(result, Err(Error::AuthenticationFailure)));
        assert_eq!(
            opener.cached.as_ref().map(|c| c.digest),
            Some(KdfDigest::Sha512)
        );
    }

    #[test]
    fn wrong_password_fails_before_key_derivation() {
        let (sealer, _) = Sealer::derive("pw", &SecurityConfig::tier(SecurityTier::Minimum)).unwrap();
        let mut container: Vec<u8> = Vec::new();
        sealer
            .seal(&mut &b"x"[..], &mut container, StreamOptions::new())
            .unwrap();

        let mut opener = Opener::new("other").unwrap();
        let result = opener.open(&mut &container[..], &mut std::io::sink(), StreamOptions::new());

        assert!(matches!(result, Err(Error::InvalidPassword)));
        assert!(opener.cached.is_none());
    }

    #[test]
    fn empty_password_is_rejected() {
        assert!(matches!(Opener::new(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            Sealer::derive("", &fast_config()),
            Err(Error::InvalidArgument(_))
        ));
    }
}
