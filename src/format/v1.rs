//! Container format v1.
//!
//! V1 Container Format:
//! ```text
//! MAGIC (4) | VERSION (1) | MODE (1) | FLAGS (1)
//! | CHECKSUM_LEN (u32 BE) | CHECKSUM | IV_LEN (u32 BE) | IV | CONFIG_LEN (u32 BE) | CONFIG
//! | CIPHERTEXT
//! ```
//!
//! `FLAGS` bit 0 marks a deflated payload and bits 1-2 select the PBKDF2
//! digest (0 = SHA-256, 1 = SHA-1, 2 = SHA-512). `CONFIG` is the UTF-8 KDF
//! configuration string. In GCM mode the complete serialized header is
//! authenticated as associated data.

use std::io::Read;

use super::{ContainerHeader, read_field};
use crate::crypto::{CHECKSUM_LEN, CipherMode, KdfDigest};
use crate::error::{Error, Result};

/// Current file format version.
pub const VERSION_V1: u8 = 1;

/// Payload is deflate-compressed.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;
/// PBKDF2 digest identifier.
pub const DIGEST_MASK: u8 = 0b0000_0110;
const DIGEST_SHIFT: u32 = 1;

/// Upper bound for the serialized KDF configuration.
pub const MAX_CONFIG_LEN: usize = 4096;

const MODE_LEN: usize = 1;
const FLAGS_LEN: usize = 1;
const LEN_PREFIX: usize = 4;

/// Byte length of everything after MAGIC and VERSION.
pub fn encoded_body_len(header: &ContainerHeader) -> usize {
    MODE_LEN
        + FLAGS_LEN
        + LEN_PREFIX * 3
        + header.password_checksum().len()
        + header.iv().len()
        + header.kdf_config().len()
}

/// Appends the body to `buf`.
///
/// Field lengths are bounded by `ContainerHeader::new` and [`read_body`], so
/// every length fits its u32 prefix.
pub fn encode_body(header: &ContainerHeader, buf: &mut Vec<u8>) {
    let mut flags = header.kdf_digest().id() << DIGEST_SHIFT;
    if header.compressed() {
        flags |= FLAG_COMPRESSED;
    }
    buf.extend_from_slice(&[header.mode().id(), flags]);

    push_prefixed(buf, header.password_checksum());
    push_prefixed(buf, header.iv());
    push_prefixed(buf, header.kdf_config().as_bytes());
}

/// Parses a v1 header body.
///
/// # Errors
///
/// Returns `MalformedContainer` if the body is truncated or any field has an
/// unexpected length.
pub fn read_body<R: Read>(input: &mut R) -> Result<ContainerHeader> {
    let mut fixed = [0u8; MODE_LEN + FLAGS_LEN];
    read_field(input, &mut fixed, "mode")?;

    let mode = CipherMode::from_id(fixed[0])
        .ok_or_else(|| Error::MalformedContainer(format!("unknown cipher mode {}", fixed[0])))?;
    let flags = fixed[1];
    if flags & !(FLAG_COMPRESSED | DIGEST_MASK) != 0 {
        return Err(Error::MalformedContainer(format!("unknown flags {flags:#04x}")));
    }
    let digest_id = (flags & DIGEST_MASK) >> DIGEST_SHIFT;
    let kdf_digest = KdfDigest::from_id(digest_id)
        .ok_or_else(|| Error::MalformedContainer(format!("unknown KDF digest {digest_id}")))?;

    let checksum = read_prefixed(input, "checksum", CHECKSUM_LEN, CHECKSUM_LEN)?;
    let iv = read_prefixed(input, "IV", mode.iv_len(), mode.iv_len())?;
    let config = read_prefixed(input, "KDF configuration", 1, MAX_CONFIG_LEN)?;

    let mut password_checksum = [0u8; CHECKSUM_LEN];
    password_checksum.copy_from_slice(&checksum);
    let kdf_config = String::from_utf8(config)
        .map_err(|_| Error::MalformedContainer("KDF configuration is not UTF-8".into()))?;

    Ok(ContainerHeader {
        version: VERSION_V1,
        mode,
        compressed: flags & FLAG_COMPRESSED != 0,
        password_checksum,
        iv,
        kdf_digest,
        kdf_config,
    })
}

fn push_prefixed(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buf.extend_from_slice(field);
}

fn read_prefixed<R: Read>(input: &mut R, field: &str, min: usize, max: usize) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; LEN_PREFIX];
    read_field(input, &mut len_buf, field)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len < min || len > max {
        return Err(Error::MalformedContainer(format!(
            "invalid {field} length {len}"
        )));
    }

    let mut buf = vec![0u8; len];
    read_field(input, &mut buf, field)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{MAGIC_LEN, VER_LEN};

    fn encoded(mode: CipherMode, compressed: bool) -> Vec<u8> {
        ContainerHeader::new(
            mode,
            compressed,
            [9u8; CHECKSUM_LEN],
            vec![1u8; mode.iv_len()],
            "256:2:10:abcd".into(),
        )
        .unwrap()
        .to_bytes()
    }

    #[test]
    fn layout_is_length_prefixed_big_endian() {
        let bytes = encoded(CipherMode::Gcm, true);
        let body = &bytes[MAGIC_LEN + VER_LEN..];

        assert_eq!(body[0], 2);
        assert_eq!(body[1], FLAG_COMPRESSED);
        assert_eq!(&body[2..6], &[0, 0, 0, 32]);
        assert_eq!(&body[38..42], &[0, 0, 0, 12]);
        assert_eq!(&body[54..58], &[0, 0, 0, 13]);
        assert_eq!(&body[58..], b"256:2:10:abcd");
    }

    #[test]
    fn digest_is_stored_in_flags() {
        for (digest, bits) in [
            (KdfDigest::Sha256, 0b000),
            (KdfDigest::Sha1, 0b010),
            (KdfDigest::Sha512, 0b100),
        ] {
            let bytes = ContainerHeader::new(
                CipherMode::Cbc,
                true,
                [9u8; CHECKSUM_LEN],
                vec![1u8; CipherMode::Cbc.iv_len()],
                "256:2:10:abcd".into(),
            )
            .unwrap()
            .with_kdf_digest(digest)
            .to_bytes();

            assert_eq!(bytes[MAGIC_LEN + VER_LEN + 1], FLAG_COMPRESSED | bits);
            let (parsed, _) = ContainerHeader::from_bytes(&bytes).unwrap();
            assert_eq!(parsed.kdf_digest(), digest);
            assert!(parsed.compressed());
        }
    }

    #[test]
    fn unknown_digest_fails() {
        let mut bytes = encoded(CipherMode::Gcm, false);
        bytes[MAGIC_LEN + VER_LEN + 1] = DIGEST_MASK;
        assert!(matches!(
            ContainerHeader::from_bytes(&bytes),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn unknown_mode_fails() {
        let mut bytes = encoded(CipherMode::Cbc, false);
        bytes[MAGIC_LEN + VER_LEN] = 7;
        assert!(matches!(
            ContainerHeader::from_bytes(&bytes),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn unknown_flags_fail() {
        let mut bytes = encoded(CipherMode::Cbc, false);
        bytes[MAGIC_LEN + VER_LEN + 1] = 0x80;
        assert!(matches!(
            ContainerHeader::from_bytes(&bytes),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn oversized_length_prefix_fails_without_allocating() {
        let mut bytes = encoded(CipherMode::Cbc, false);
        let prefix = MAGIC_LEN + VER_LEN + 2;
        bytes[prefix..prefix + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            ContainerHeader::from_bytes(&bytes),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn iv_length_must_match_mode() {
        let mut bytes = encoded(CipherMode::Gcm, false);
        // mode byte says CBC (16-byte IV) while the stored IV is 12 bytes
        bytes[MAGIC_LEN + VER_LEN] = 1;
        assert!(matches!(
            ContainerHeader::from_bytes(&bytes),
            Err(Error::MalformedContainer(_))
        ));
    }
}
