//! AES cipher engine.
//!
//! Two modes share one container format:
//! - `Cbc`: AES-CBC with PKCS#7 padding, confidentiality only.
//! - `Gcm`: AES-GCM. Streams are split into chunks of [`GCM_CHUNK_LEN`]
//!   plaintext bytes, each sealed under `iv XOR be64(chunk_index)` with the
//!   caller's associated data plus a final-chunk flag, so reordering and
//!   truncation are detected.
//!
//! Contexts are single-operation values; an engine can start any number of
//! them, one per IV.

use std::fmt;

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use log::debug;
use zeroize::Zeroizing;

use super::{BLOCK_LEN, CBC_IV_LEN, GCM_IV_LEN, TAG_LEN};
use crate::error::{Error, Result};

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Plaintext bytes per authenticated chunk.
pub const GCM_CHUNK_LEN: usize = 64 * 1024;

const FINAL_CHUNK: u8 = 1;
const INNER_CHUNK: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// AES-CBC, PKCS#7 padding.
    Cbc,
    /// AES-GCM, 16-byte tag per chunk.
    Gcm,
}

impl CipherMode {
    pub fn iv_len(self) -> usize {
        match self {
            CipherMode::Cbc => CBC_IV_LEN,
            CipherMode::Gcm => GCM_IV_LEN,
        }
    }

    pub(crate) fn id(self) -> u8 {
        match self {
            CipherMode::Cbc => 1,
            CipherMode::Gcm => 2,
        }
    }

    pub(crate) fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(CipherMode::Cbc),
            2 => Some(CipherMode::Gcm),
            _ => None,
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherMode::Cbc => write!(f, "AES-CBC"),
            CipherMode::Gcm => write!(f, "AES-GCM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

enum AesBlock {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesBlock {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| Error::InvalidKey(key.len());
        match key.len() {
            16 => Ok(Self::Aes128(Aes128::new_from_slice(key).map_err(invalid)?)),
            24 => Ok(Self::Aes192(Aes192::new_from_slice(key).map_err(invalid)?)),
            32 => Ok(Self::Aes256(Aes256::new_from_slice(key).map_err(invalid)?)),
            n => Err(Error::InvalidKey(n)),
        }
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut Block) {
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes192(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
    }
}

enum AesGcmCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl AesGcmCipher {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| Error::InvalidKey(key.len());
        match key.len() {
            16 => Ok(Self::Aes128(Aes128Gcm::new_from_slice(key).map_err(invalid)?)),
            24 => Ok(Self::Aes192(Aes192Gcm::new_from_slice(key).map_err(invalid)?)),
            32 => Ok(Self::Aes256(Aes256Gcm::new_from_slice(key).map_err(invalid)?)),
            n => Err(Error::InvalidKey(n)),
        }
    }

    fn seal(&self, nonce: &[u8; GCM_IV_LEN], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        let payload = Payload { msg, aad };
        let result = match self {
            Self::Aes128(c) => c.encrypt(nonce, payload),
            Self::Aes192(c) => c.encrypt(nonce, payload),
            Self::Aes256(c) => c.encrypt(nonce, payload),
        };
        result.map_err(|_| Error::InvalidArgument("chunk too large for AES-GCM"))
    }

    fn open(&self, nonce: &[u8; GCM_IV_LEN], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        let payload = Payload { msg, aad };
        let result = match self {
            Self::Aes128(c) => c.decrypt(nonce, payload),
            Self::Aes192(c) => c.decrypt(nonce, payload),
            Self::Aes256(c) => c.decrypt(nonce, payload),
        };
        result.map_err(|_| Error::AuthenticationFailure)
    }
}

/// Holds the derived key and the selected mode.
pub struct CipherEngine {
    key: Zeroizing<Vec<u8>>,
    mode: CipherMode,
}

impl fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherEngine")
            .field("key", &"[REDACTED]")
            .field("mode", &self.mode)
            .finish()
    }
}

impl CipherEngine {
    pub fn new(key: &[u8], mode: CipherMode) -> Result<Self> {
        match key.len() {
            16 | 24 | 32 => Ok(Self {
                key: Zeroizing::new(key.to_vec()),
                mode,
            }),
            n => Err(Error::InvalidKey(n)),
        }
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Starts a streaming operation. `aad` is authenticated in GCM mode and
    /// ignored in CBC mode.
    pub fn start(&self, direction: Direction, iv: &[u8], aad: &[u8]) -> Result<CipherContext> {
        let expected = self.mode.iv_len();
        if iv.len() != expected {
            return Err(Error::InvalidIv {
                expected,
                actual: iv.len(),
            });
        }
        debug!(
            "starting {} {:?} with {}-bit key",
            self.mode,
            direction,
            self.key.len() * 8
        );

        match self.mode {
            CipherMode::Cbc => {
                let mut chain = [0u8; CBC_IV_LEN];
                chain.copy_from_slice(iv);
                Ok(CipherContext::Cbc(CbcStream {
                    cipher: AesBlock::new(&self.key)?,
                    direction,
                    chain,
                    pending: Zeroizing::new(Vec::new()),
                }))
            }
            CipherMode::Gcm => {
                let mut base = [0u8; GCM_IV_LEN];
                base.copy_from_slice(iv);
                let mut aad = aad.to_vec();
                aad.push(INNER_CHUNK);
                Ok(CipherContext::Gcm(GcmStream {
                    cipher: AesGcmCipher::new(&self.key)?,
                    direction,
                    base_nonce: base,
                    aad,
                    counter: 0,
                    pending: Zeroizing::new(Vec::new()),
                }))
            }
        }
    }

    /// Encrypts a complete, non-empty buffer.
    pub fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_with_aad(iv, plaintext, &[])
    }

    pub fn encrypt_with_aad(&self, iv: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Err(Error::InvalidArgument("data cannot be empty"));
        }
        let mut ctx = self.start(Direction::Encrypt, iv, aad)?;
        let mut out = Vec::with_capacity(plaintext.len() + TAG_LEN + BLOCK_LEN);
        ctx.update(plaintext, &mut out)?;
        ctx.finish(&mut out)?;
        Ok(out)
    }

    /// Decrypts a complete buffer.
    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt_with_aad(iv, ciphertext, &[])
    }

    pub fn decrypt_with_aad(
        &self,
        iv: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let mut ctx = self.start(Direction::Decrypt, iv, aad)?;
        let mut out = Zeroizing::new(Vec::with_capacity(ciphertext.len()));
        ctx.update(ciphertext, &mut out)?;
        ctx.finish(&mut out)?;
        Ok(out)
    }
}

/// One in-flight encryption or decryption.
///
/// Feed input with [`CipherContext::update`]; output is appended to `out`
/// as soon as it is safe to release. [`CipherContext::finish`] consumes the
/// context and emits the remainder.
pub enum CipherContext {
    Cbc(CbcStream),
    Gcm(GcmStream),
}

impl CipherContext {
    pub fn direction(&self) -> Direction {
        match self {
            CipherContext::Cbc(s) => s.direction,
            CipherContext::Gcm(s) => s.direction,
        }
    }

    pub fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        match self {
            CipherContext::Cbc(s) => {
                s.update(input, out);
                Ok(())
            }
            CipherContext::Gcm(s) => s.update(input, out),
        }
    }

    pub fn finish(self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            CipherContext::Cbc(s) => s.finish(out),
            CipherContext::Gcm(s) => s.finish(out),
        }
    }
}

pub struct CbcStream {
    cipher: AesBlock,
    direction: Direction,
    chain: [u8; BLOCK_LEN],
    pending: Zeroizing<Vec<u8>>,
}

impl CbcStream {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);

        let aligned = self.pending.len() - self.pending.len() % BLOCK_LEN;
        let ready = match self.direction {
            Direction::Encrypt => aligned,
            // the last full block carries the padding; hold it until finish
            Direction::Decrypt if aligned == self.pending.len() => {
                aligned.saturating_sub(BLOCK_LEN)
            }
            Direction::Decrypt => aligned,
        };

        for block in self.pending[..ready].chunks_exact(BLOCK_LEN) {
            match self.direction {
                Direction::Encrypt => cbc_encrypt_block(&self.cipher, &mut self.chain, block, out),
                Direction::Decrypt => cbc_decrypt_block(&self.cipher, &mut self.chain, block, out),
            }
        }
        self.pending.drain(..ready);
    }

    fn finish(mut self, out: &mut Vec<u8>) -> Result<()> {
        match self.direction {
            Direction::Encrypt => {
                let pad = BLOCK_LEN - self.pending.len();
                self.pending.resize(BLOCK_LEN, pad as u8);
                cbc_encrypt_block(&self.cipher, &mut self.chain, &self.pending, out);
                Ok(())
            }
            Direction::Decrypt => {
                if self.pending.len() != BLOCK_LEN {
                    return Err(Error::PaddingError);
                }
                let mut last = Zeroizing::new(Vec::with_capacity(BLOCK_LEN));
                cbc_decrypt_block(&self.cipher, &mut self.chain, &self.pending, &mut last);

                let pad = last[BLOCK_LEN - 1] as usize;
                if pad == 0 || pad > BLOCK_LEN {
                    return Err(Error::PaddingError);
                }
                if last[BLOCK_LEN - pad..].iter().any(|&b| b as usize != pad) {
                    return Err(Error::PaddingError);
                }
                out.extend_from_slice(&last[..BLOCK_LEN - pad]);
                Ok(())
            }
        }
    }
}

fn cbc_encrypt_block(cipher: &AesBlock, chain: &mut [u8; BLOCK_LEN], input: &[u8], out: &mut Vec<u8>) {
    let mut block = Block::default();
    for ((b, p), c) in block.iter_mut().zip(input).zip(chain.iter()) {
        *b = p ^ c;
    }
    cipher.encrypt_block(&mut block);
    chain.copy_from_slice(&block);
    out.extend_from_slice(&block);
}

fn cbc_decrypt_block(cipher: &AesBlock, chain: &mut [u8; BLOCK_LEN], input: &[u8], out: &mut Vec<u8>) {
    let mut block = Block::clone_from_slice(input);
    cipher.decrypt_block(&mut block);
    for (b, c) in block.iter_mut().zip(chain.iter()) {
        *b ^= c;
    }
    chain.copy_from_slice(input);
    out.extend_from_slice(&block);
}

pub struct GcmStream {
    cipher: AesGcmCipher,
    direction: Direction,
    base_nonce: [u8; GCM_IV_LEN],
    /// Caller's associated data followed by the final-chunk flag byte.
    aad: Vec<u8>,
    counter: u64,
    pending: Zeroizing<Vec<u8>>,
}

impl GcmStream {
    fn chunk_input_len(&self) -> usize {
        match self.direction {
            Direction::Encrypt => GCM_CHUNK_LEN,
            Direction::Decrypt => GCM_CHUNK_LEN + TAG_LEN,
        }
    }

    fn next_nonce(&mut self) -> Result<[u8; GCM_IV_LEN]> {
        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(Error::InvalidArgument("stream exceeds the chunk counter"))?;
        Ok(nonce)
    }

    fn process_chunk(&mut self, start: usize, end: usize, last: bool) -> Result<Vec<u8>> {
        let nonce = self.next_nonce()?;
        if let Some(flag) = self.aad.last_mut() {
            *flag = if last { FINAL_CHUNK } else { INNER_CHUNK };
        }
        let chunk = &self.pending[start..end];
        match self.direction {
            Direction::Encrypt => self.cipher.seal(&nonce, &self.aad, chunk),
            Direction::Decrypt => self.cipher.open(&nonce, &self.aad, chunk),
        }
    }

    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(input);

        // a chunk is only released once more input follows it, so the
        // final chunk is always the one sealed in finish()
        let size = self.chunk_input_len();
        let mut start = 0;
        while self.pending.len() - start > size {
            let processed = Zeroizing::new(self.process_chunk(start, start + size, false)?);
            out.extend_from_slice(&processed);
            start += size;
        }
        self.pending.drain(..start);
        Ok(())
    }

    fn finish(mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.direction == Direction::Decrypt && self.pending.len() < TAG_LEN {
            return Err(Error::AuthenticationFailure);
        }
        let end = self.pending.len();
        let processed = Zeroizing::new(self.process_chunk(0, end, true)?);
        out.extend_from_slice(&processed);
        Ok(())
    }
}

fn chunk_nonce(base: &[u8; GCM_IV_LEN], counter: u64) -> [u8; GCM_IV_LEN] {
    let mut nonce = *base;
    for (n, c) in nonce[GCM_IV_LEN - 8..].iter_mut().zip(counter.to_be_bytes()) {
        *n ^= c;
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    fn iv_for(mode: CipherMode) -> Vec<u8> {
        vec![7u8; mode.iv_len()]
    }

    #[test]
    fn buffer_roundtrip_all_modes_and_key_sizes() {
        let plaintext = b"Hello, World! This is secret data.";
        for mode in [CipherMode::Cbc, CipherMode::Gcm] {
            for len in [16, 24, 32] {
                let engine = CipherEngine::new(&KEY[..len], mode).unwrap();
                let iv = iv_for(mode);
                let ct = engine.encrypt(&iv, plaintext).unwrap();
                assert_ne!(&ct[..plaintext.len()], &plaintext[..]);
                assert_eq!(&*engine.decrypt(&iv, &ct).unwrap(), plaintext);
            }
        }
    }

    #[test]
    fn cbc_output_is_padded_to_block() {
        let engine = CipherEngine::new(&KEY, CipherMode::Cbc).unwrap();
        let iv = iv_for(CipherMode::Cbc);
        assert_eq!(engine.encrypt(&iv, &[1u8; 15]).unwrap().len(), 16);
        assert_eq!(engine.encrypt(&iv, &[1u8; 16]).unwrap().len(), 32);
    }

    #[test]
    fn cbc_matches_known_answer() {
        // NIST SP 800-38A F.2.5, first block, without the padding block
        let key = hex::decode("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4")
            .unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let pt = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let engine = CipherEngine::new(&key, CipherMode::Cbc).unwrap();
        let ct = engine.encrypt(&iv, &pt).unwrap();
        assert_eq!(hex::encode(&ct[..16]), "f58c4c04d6e5f1ba779eabfb5f7bfbd6");
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        let engine = CipherEngine::new(&KEY, CipherMode::Gcm).unwrap();
        assert!(matches!(
            engine.encrypt(&iv_for(CipherMode::Gcm), b""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        assert!(matches!(
            CipherEngine::new(&[0u8; 20], CipherMode::Cbc),
            Err(Error::InvalidKey(20))
        ));
        let engine = CipherEngine::new(&KEY, CipherMode::Gcm).unwrap();
        assert!(matches!(
            engine.encrypt(&[0u8; 16], b"data"),
            Err(Error::InvalidIv {
                expected: 12,
                actual: 16
            })
        ));
    }

    #[test]
    fn gcm_tampering_fails_authentication() {
        let engine = CipherEngine::new(&KEY, CipherMode::Gcm).unwrap();
        let iv = iv_for(CipherMode::Gcm);
        let ct = engine.encrypt(&iv, b"Secret message").unwrap();

        for i in 0..ct.len() {
            let mut tampered = ct.clone();
            tampered[i] ^= 0x01;
            assert!(matches!(
                engine.decrypt(&iv, &tampered),
                Err(Error::AuthenticationFailure)
            ));
        }
    }

    #[test]
    fn gcm_aad_is_authenticated() {
        let engine = CipherEngine::new(&KEY, CipherMode::Gcm).unwrap();
        let iv = iv_for(CipherMode::Gcm);
        let ct = engine.encrypt_with_aad(&iv, b"payload", b"header").unwrap();

        assert!(engine.decrypt_with_aad(&iv, &ct, b"header").is_ok());
        assert!(matches!(
            engine.decrypt_with_aad(&iv, &ct, b"headeR"),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn cbc_wrong_key_or_truncation_is_a_padding_error() {
        let engine = CipherEngine::new(&KEY, CipherMode::Cbc).unwrap();
        let iv = iv_for(CipherMode::Cbc);
        let ct = engine.encrypt(&iv, &[9u8; 40]).unwrap();

        assert!(matches!(
            engine.decrypt(&iv, &ct[..ct.len() - 1]),
            Err(Error::PaddingError)
        ));
        assert!(matches!(engine.decrypt(&iv, &[]), Err(Error::PaddingError)));
    }

    #[test]
    fn streaming_matches_across_chunk_boundaries() {
        let data: Vec<u8> = (0..(GCM_CHUNK_LEN * 2 + 123)).map(|i| (i % 251) as u8).collect();

        for mode in [CipherMode::Cbc, CipherMode::Gcm] {
            let engine = CipherEngine::new(&KEY, mode).unwrap();
            let iv = iv_for(mode);

            let mut enc = engine.start(Direction::Encrypt, &iv, b"aad").unwrap();
            let mut ct = Vec::new();
            for piece in data.chunks(777) {
                enc.update(piece, &mut ct).unwrap();
            }
            enc.finish(&mut ct).unwrap();

            let mut dec = engine.start(Direction::Decrypt, &iv, b"aad").unwrap();
            let mut pt = Vec::new();
            for piece in ct.chunks(1000) {
                dec.update(piece, &mut pt).unwrap();
            }
            dec.finish(&mut pt).unwrap();

            assert_eq!(pt, data, "mode {mode}");
        }
    }

    #[test]
    fn gcm_stream_truncated_at_chunk_boundary_fails() {
        let engine = CipherEngine::new(&KEY, CipherMode::Gcm).unwrap();
        let iv = iv_for(CipherMode::Gcm);
        let data = vec![1u8; GCM_CHUNK_LEN * 2];
        let ct = engine.encrypt(&iv, &data).unwrap();

        let truncated = &ct[..GCM_CHUNK_LEN + TAG_LEN];
        assert!(matches!(
            engine.decrypt(&iv, truncated),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn chunk_nonces_are_distinct() {
        let base = [0xAAu8; GCM_IV_LEN];
        assert_eq!(chunk_nonce(&base, 0), base);
        assert_ne!(chunk_nonce(&base, 1), chunk_nonce(&base, 2));
    }
}
