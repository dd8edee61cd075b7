//! Streaming transform: deflate + cipher over `Read`/`Write`.
//!
//! Encrypt: input → deflate (optional) → cipher → output.
//! Decrypt: input → cipher → inflate (optional) → output.
//!
//! The container header is handled by the caller; these functions only see
//! the payload.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::write::{DeflateDecoder, DeflateEncoder};
use log::warn;
use zeroize::Zeroizing;

use crate::crypto::{CipherContext, Direction};
use crate::error::{Error, Result};

/// Read buffer size for streaming operations.
pub const IO_BUFFER_LEN: usize = 64 * 1024;

/// Call-time options for streaming operations.
#[derive(Default)]
pub struct StreamOptions<'a> {
    /// Exact number of payload bytes the call will read from its input.
    ///
    /// When set, progress is reported as `floor(consumed * 100 / total_len)`.
    /// When absent, only the final `100` is reported.
    pub total_len: Option<u64>,
    /// Receives progress percentages in `0..=100`, strictly increasing.
    pub progress: Option<&'a mut dyn FnMut(u8)>,
}

impl<'a> StreamOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total_len(mut self, total_len: u64) -> Self {
        self.total_len = Some(total_len);
        self
    }

    pub fn with_progress(mut self, progress: &'a mut dyn FnMut(u8)) -> Self {
        self.progress = Some(progress);
        self
    }
}

struct Progress<'a> {
    observer: Option<&'a mut dyn FnMut(u8)>,
    total: Option<u64>,
    consumed: u64,
    last: Option<u8>,
}

impl<'a> Progress<'a> {
    fn new(options: StreamOptions<'a>) -> Self {
        Self {
            observer: options.progress,
            total: options.total_len,
            consumed: 0,
            last: None,
        }
    }

    fn advance(&mut self, n: usize) {
        self.consumed = self.consumed.saturating_add(n as u64);
        if let Some(total) = self.total.filter(|&t| t > 0) {
            let percent = (self.consumed.saturating_mul(100) / total).min(100) as u8;
            self.emit(percent);
        }
    }

    fn complete(&mut self) {
        self.emit(100);
    }

    fn emit(&mut self, percent: u8) {
        if self.last.is_some_and(|last| percent <= last) {
            return;
        }
        if let Some(observer) = self.observer.as_deref_mut() {
            observer(percent);
        }
        self.last = Some(percent);
    }
}

/// Runs `ctx` over everything readable from `input`, dispatching on the
/// context's direction.
///
/// `compressed` deflates before encryption or inflates after decryption.
pub fn transform<R, W>(
    ctx: CipherContext,
    input: &mut R,
    output: &mut W,
    compressed: bool,
    options: StreamOptions<'_>,
) -> Result<u64>
where
    R: Read,
    W: Write,
{
    match ctx.direction() {
        Direction::Encrypt => encrypt_stream(ctx, input, output, compressed, options),
        Direction::Decrypt => decrypt_stream(ctx, input, output, compressed, options),
    }
}

/// Encrypts `input` into `output`, returning the number of plaintext bytes
/// consumed.
///
/// The container header must already have been written. `output` is flushed
/// on success. On failure a flush is still attempted, and whatever was
/// already written stays in the sink; callers must discard it.
pub fn encrypt_stream<R: Read, W: Write>(
    ctx: CipherContext,
    input: &mut R,
    output: &mut W,
    compress: bool,
    options: StreamOptions<'_>,
) -> Result<u64> {
    if ctx.direction() != Direction::Encrypt {
        return Err(Error::InvalidArgument("cipher context is not set up for encryption"));
    }
    let result = encrypt_payload(ctx, input, output, compress, options);
    flush_output(output, result)
}

/// Decrypts `input` into `output`, returning the number of plaintext bytes
/// written.
///
/// `input` must be positioned at the first ciphertext byte.
pub fn decrypt_stream<R: Read, W: Write>(
    ctx: CipherContext,
    input: &mut R,
    output: &mut W,
    compressed: bool,
    options: StreamOptions<'_>,
) -> Result<u64> {
    if ctx.direction() != Direction::Decrypt {
        return Err(Error::InvalidArgument("cipher context is not set up for decryption"));
    }
    let result = decrypt_payload(ctx, input, output, compressed, options);
    flush_output(output, result)
}

fn flush_output<W: Write>(output: &mut W, result: Result<u64>) -> Result<u64> {
    match result {
        Ok(n) => {
            output.flush()?;
            Ok(n)
        }
        Err(e) => {
            if let Err(flush_err) = output.flush() {
                warn!("flushing output after failed operation also failed: {flush_err}");
            }
            Err(e)
        }
    }
}

fn encrypt_payload<R: Read, W: Write>(
    mut ctx: CipherContext,
    input: &mut R,
    output: &mut W,
    compress: bool,
    options: StreamOptions<'_>,
) -> Result<u64> {
    let mut progress = Progress::new(options);
    let mut deflate = compress.then(|| DeflateEncoder::new(Vec::new(), Compression::default()));

    let mut buf = Zeroizing::new(vec![0u8; IO_BUFFER_LEN]);
    let mut ciphertext = Vec::with_capacity(IO_BUFFER_LEN * 2);
    let mut consumed = 0u64;

    loop {
        let n = read_chunk(input, &mut buf)?;
        if n == 0 {
            break;
        }
        let plain = &buf[..n];

        match deflate.as_mut() {
            Some(encoder) => {
                encoder.write_all(plain)?;
                let staged = encoder.get_mut();
                ctx.update(staged.as_slice(), &mut ciphertext)?;
                staged.clear();
            }
            None => ctx.update(plain, &mut ciphertext)?,
        }

        output.write_all(&ciphertext)?;
        ciphertext.clear();

        consumed += n as u64;
        progress.advance(n);
    }

    if let Some(encoder) = deflate {
        let rest = encoder.finish()?;
        ctx.update(&rest, &mut ciphertext)?;
    }
    ctx.finish(&mut ciphertext)?;
    output.write_all(&ciphertext)?;

    progress.complete();
    Ok(consumed)
}

fn decrypt_payload<R: Read, W: Write>(
    mut ctx: CipherContext,
    input: &mut R,
    output: &mut W,
    compressed: bool,
    options: StreamOptions<'_>,
) -> Result<u64> {
    let mut progress = Progress::new(options);
    let counter = CountingWriter::new(output);
    let mut sink = if compressed {
        PlainSink::Inflate(DeflateDecoder::new(counter))
    } else {
        PlainSink::Direct(counter)
    };

    let mut buf = vec![0u8; IO_BUFFER_LEN];
    let mut plain = Zeroizing::new(Vec::with_capacity(IO_BUFFER_LEN * 2));

    loop {
        let n = read_chunk(input, &mut buf)?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n], &mut plain)?;
        sink.write_all(&plain)?;
        plain.clear();
        progress.advance(n);
    }

    ctx.finish(&mut plain)?;
    sink.write_all(&plain)?;
    let produced = sink.finish()?;

    progress.complete();
    Ok(produced)
}

fn read_chunk<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

enum PlainSink<W: Write> {
    Direct(CountingWriter<W>),
    Inflate(DeflateDecoder<CountingWriter<W>>),
}

impl<W: Write> PlainSink<W> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            PlainSink::Direct(w) => w.write_all(data).map_err(Error::Io),
            PlainSink::Inflate(d) => d.write_all(data).map_err(inflate_error),
        }
    }

    fn finish(self) -> Result<u64> {
        match self {
            PlainSink::Direct(w) => Ok(w.count),
            PlainSink::Inflate(d) => Ok(d.finish().map_err(inflate_error)?.count),
        }
    }
}

fn inflate_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
            Error::MalformedContainer(format!("compressed payload is corrupt: {e}"))
        }
        _ => Error::Io(e),
    }
}

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
