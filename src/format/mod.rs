//! Container format handling.
//!
//! Provides version-aware parsing and serialization of the header that
//! precedes every ciphertext. The header carries everything needed to decrypt
//! except the password itself.

use std::io::{self, Cursor, Read, Write};

use crate::crypto::{CHECKSUM_LEN, CipherMode, KdfDigest, KdfParams, ct_eq, password_checksum};
use crate::error::{Error, Result};

pub mod v1;

/// Magic bytes identifying a pwcrypt container ("PWCR").
pub const MAGIC: &[u8; 4] = b"PWCR";
/// Length of magic bytes.
pub const MAGIC_LEN: usize = 4;
/// Length of version field.
pub const VER_LEN: usize = 1;
/// Latest format version
pub const CURRENT_VERSION: u8 = v1::VERSION_V1;

/// The non-secret parameters stored ahead of the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    version: u8,
    mode: CipherMode,
    compressed: bool,
    password_checksum: [u8; CHECKSUM_LEN],
    iv: Vec<u8>,
    kdf_digest: KdfDigest,
    kdf_config: String,
}

impl ContainerHeader {
    /// Creates a header for the current format version.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIv` if `iv` does not match the mode's IV length and
    /// `InvalidConfiguration` if `kdf_config` is empty or too long.
    pub fn new(
        mode: CipherMode,
        compressed: bool,
        password_checksum: [u8; CHECKSUM_LEN],
        iv: Vec<u8>,
        kdf_config: String,
    ) -> Result<Self> {
        if iv.len() != mode.iv_len() {
            return Err(Error::InvalidIv {
                expected: mode.iv_len(),
                actual: iv.len(),
            });
        }
        if kdf_config.is_empty() || kdf_config.len() > v1::MAX_CONFIG_LEN {
            return Err(Error::InvalidConfiguration(format!(
                "KDF configuration must be 1..={} bytes",
                v1::MAX_CONFIG_LEN
            )));
        }
        Ok(Self {
            version: CURRENT_VERSION,
            mode,
            compressed,
            password_checksum,
            iv,
            kdf_digest: KdfDigest::default(),
            kdf_config,
        })
    }

    /// Records the PBKDF2 digest the key was derived with.
    pub fn with_kdf_digest(self, kdf_digest: KdfDigest) -> Self {
        Self { kdf_digest, ..self }
    }

    /// Returns the container format version.
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Returns `true` if the payload was deflated before encryption.
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    pub fn password_checksum(&self) -> &[u8; CHECKSUM_LEN] {
        &self.password_checksum
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn kdf_digest(&self) -> KdfDigest {
        self.kdf_digest
    }

    /// Returns the serialized KDF configuration.
    pub fn kdf_config(&self) -> &str {
        &self.kdf_config
    }

    /// Rebuilds the KDF parameters used for encryption.
    ///
    /// # Errors
    ///
    /// Returns `MalformedContainer` if the stored configuration does not
    /// parse or describes parameters outside the supported range.
    pub fn kdf(&self) -> Result<KdfParams> {
        KdfParams::parse(&self.kdf_config)
            .map(|kdf| kdf.with_digest(self.kdf_digest))
            .map_err(|e| Error::MalformedContainer(format!("bad KDF configuration: {e}")))
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(MAGIC);
        buf.push(self.version);
        v1::encode_body(self, &mut buf);
        buf
    }

    /// Parses a header from the front of `data`, returning it together with
    /// the offset of the first ciphertext byte.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = Cursor::new(data);
        let header = read_header(&mut cursor)?;
        Ok((header, cursor.position() as usize))
    }

    /// Length of the serialized header in bytes.
    pub fn encoded_len(&self) -> usize {
        MAGIC_LEN + VER_LEN + v1::encoded_body_len(self)
    }
}

/// Writes `header` to `out`.
///
/// # Errors
///
/// Returns an error if the version is unsupported or the write fails.
pub fn write_header<W: Write>(out: &mut W, header: &ContainerHeader) -> Result<()> {
    match header.version() {
        1 => Ok(out.write_all(&header.to_bytes())?),
        v => Err(Error::UnsupportedVersion(v)),
    }
}

/// Reads a header from `input`, leaving the reader positioned at the first
/// ciphertext byte.
///
/// Automatically dispatches to the appropriate version parser.
///
/// # Errors
///
/// Returns `MalformedContainer` if:
/// - The input ends before the header is complete
/// - The magic bytes are invalid
/// - A field length is inconsistent
///
/// and `UnsupportedVersion` for unknown versions.
pub fn read_header<R: Read>(input: &mut R) -> Result<ContainerHeader> {
    let mut prefix = [0u8; MAGIC_LEN + VER_LEN];
    read_field(input, &mut prefix, "magic")?;

    if &prefix[..MAGIC_LEN] != MAGIC {
        return Err(Error::MalformedContainer("invalid magic".into()));
    }

    match prefix[MAGIC_LEN] {
        1 => v1::read_body(input),
        v => Err(Error::UnsupportedVersion(v)),
    }
}

/// Returns `true` if `password` matches the checksum stored in `header`.
///
/// The comparison always inspects every byte.
pub fn validate_password(header: &ContainerHeader, password: &str) -> bool {
    let candidate = password_checksum(password);
    ct_eq(&candidate, header.password_checksum())
}

/// `read_exact` that reports a short read as a malformed container.
pub(crate) fn read_field<R: Read>(input: &mut R, buf: &mut [u8], field: &str) -> Result<()> {
    input.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            Error::MalformedContainer(format!("container truncated while reading {field}"))
        }
        _ => Error::Io(e),
    })
}
