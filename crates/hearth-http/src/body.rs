//! HTTP body codecs.
//!
//! This module provides streaming body handling:
//! - [`LengthReader`]: exactly `Content-Length` bytes, never past the message
//! - [`ChunkedReader`]: chunked transfer-coding, extensions ignored, trailers kept
//! - [`ChunkedEncoder`]: chunked transfer-coding on the way out
//! - [`BoundaryReader`]: yields bytes up to a delimiter sequence, used to
//!   split `multipart/form-data`
//! - [`SizeLimit`]: fails once a byte budget is exhausted
//!
//! Every decoder implements [`std::io::Read`], so they stack. Decoder errors
//! travel as [`io::Error`] values wrapping a [`BodyError`]; convert back with
//! `BodyError::from`.

use crate::parser::{self, ParseError};
use hearth_core::Headers;
use memchr::memmem;
use std::io::{self, BufRead, Read, Write};

/// Longest accepted chunk-size or trailer line.
const CHUNK_LINE_LIMIT: usize = 8192;

/// Read granularity of [`BoundaryReader`].
const BOUNDARY_READ_SIZE: usize = 8192;

/// Error types for body reading.
#[derive(Debug)]
pub enum BodyError {
    /// Body exceeds maximum allowed size.
    TooLarge {
        /// The declared or actual size.
        size: u64,
        /// The maximum allowed size.
        max: u64,
    },
    /// Invalid chunked encoding.
    InvalidChunkedEncoding {
        /// Description of the error.
        detail: &'static str,
    },
    /// The connection ended before the body did.
    UnexpectedEof {
        /// Bytes received so far.
        received: u64,
        /// Expected total size (if known).
        expected: Option<u64>,
    },
    /// I/O error from the underlying stream.
    Io(io::Error),
}

impl std::fmt::Display for BodyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { size, max } => {
                write!(f, "body too large: {size} bytes exceeds limit of {max}")
            }
            Self::InvalidChunkedEncoding { detail } => {
                write!(f, "invalid chunked encoding: {detail}")
            }
            Self::UnexpectedEof { received, expected } => {
                if let Some(exp) = expected {
                    write!(f, "incomplete body: received {received} of {exp} bytes")
                } else {
                    write!(f, "incomplete body: received {received} bytes")
                }
            }
            Self::Io(e) => write!(f, "body I/O error: {e}"),
        }
    }
}

impl std::error::Error for BodyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BodyError> for io::Error {
    fn from(e: BodyError) -> Self {
        match e {
            BodyError::Io(e) => e,
            BodyError::UnexpectedEof { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

impl From<io::Error> for BodyError {
    fn from(e: io::Error) -> Self {
        if !e.get_ref().is_some_and(|inner| inner.is::<Self>()) {
            return Self::Io(e);
        }
        let kind = e.kind();
        match e.into_inner().map(|inner| inner.downcast::<Self>()) {
            Some(Ok(body)) => *body,
            _ => Self::Io(io::Error::from(kind)),
        }
    }
}

impl From<ParseError> for BodyError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Io(e) => Self::Io(e),
            ParseError::TimedOut => Self::Io(io::Error::from(io::ErrorKind::TimedOut)),
            ParseError::LineTooLong { .. } | ParseError::HeadersTooLarge { .. } => {
                Self::InvalidChunkedEncoding {
                    detail: "chunk line too long",
                }
            }
            _ => Self::InvalidChunkedEncoding {
                detail: "malformed trailer",
            },
        }
    }
}

// ============================================================================
// Content-Length Body Reading
// ============================================================================

/// Reads exactly `length` bytes from the underlying stream.
///
/// Never reads past the declared length, so the next request on the
/// connection stays intact. A stream that ends early is an error.
#[derive(Debug)]
pub struct LengthReader<R> {
    inner: R,
    length: u64,
    received: u64,
}

impl<R: Read> LengthReader<R> {
    #[must_use]
    pub fn new(inner: R, length: u64) -> Self {
        Self {
            inner,
            length,
            received: 0,
        }
    }

    /// Returns the declared body length.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Returns the number of bytes remaining.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.length - self.received
    }

    /// Returns true if all bytes have been read.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received >= self.length
    }
}

impl<R: Read> Read for LengthReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_complete() || buf.is_empty() {
            return Ok(0);
        }
        let want = usize::try_from(self.remaining()).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(BodyError::UnexpectedEof {
                received: self.received,
                expected: Some(self.length),
            }
            .into());
        }
        self.received += n as u64;
        Ok(n)
    }
}

// ============================================================================
// Chunked Transfer Encoding
// ============================================================================

/// State machine for chunked encoding parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Expecting chunk size line.
    ChunkSize,
    /// Reading chunk data.
    ChunkData { remaining: u64 },
    /// Expecting CRLF after chunk data.
    ChunkDataEnd,
    /// Reading trailers (after final chunk).
    Trailers,
    /// Complete.
    Complete,
}

/// Decodes chunked transfer encoding from a buffered stream.
///
/// Chunked encoding format:
/// ```text
/// chunk-size [; extension] CRLF
/// chunk-data CRLF
/// ...
/// 0 CRLF
/// [trailers] CRLF
/// ```
#[derive(Debug)]
pub struct ChunkedReader<R> {
    inner: R,
    state: ChunkedState,
    total_size: u64,
    max_size: u64,
    trailers: Headers,
}

impl<R: BufRead> ChunkedReader<R> {
    /// Create a decoder. A `max_size` of 0 means unlimited.
    #[must_use]
    pub fn new(inner: R, max_size: u64) -> Self {
        Self {
            inner,
            state: ChunkedState::ChunkSize,
            total_size: 0,
            max_size,
            trailers: Headers::new(),
        }
    }

    /// Returns true once the terminating chunk and trailers were read.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == ChunkedState::Complete
    }

    /// Returns the total decoded body size so far.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Trailer fields, populated once the body is complete.
    #[must_use]
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    fn line(&mut self) -> Result<String, BodyError> {
        parser::read_line(&mut self.inner, CHUNK_LINE_LIMIT)?.ok_or(BodyError::UnexpectedEof {
            received: self.total_size,
            expected: None,
        })
    }

    fn parse_chunk_size(line: &str) -> Result<u64, BodyError> {
        // Parse hex size (ignore chunk extensions after semicolon)
        let size = line.split(';').next().unwrap_or_default().trim();
        if size.is_empty() {
            return Err(BodyError::InvalidChunkedEncoding {
                detail: "empty chunk size",
            });
        }
        u64::from_str_radix(size, 16).map_err(|_| BodyError::InvalidChunkedEncoding {
            detail: "invalid hex chunk size",
        })
    }

    fn read_decoded(&mut self, buf: &mut [u8]) -> Result<usize, BodyError> {
        loop {
            match self.state {
                ChunkedState::ChunkSize => {
                    let line = self.line()?;
                    let size = Self::parse_chunk_size(&line)?;
                    let new_total = self.total_size.saturating_add(size);
                    if self.max_size > 0 && new_total > self.max_size {
                        return Err(BodyError::TooLarge {
                            size: new_total,
                            max: self.max_size,
                        });
                    }
                    self.state = if size == 0 {
                        ChunkedState::Trailers
                    } else {
                        ChunkedState::ChunkData { remaining: size }
                    };
                }
                ChunkedState::ChunkData { remaining } => {
                    if buf.is_empty() {
                        return Ok(0);
                    }
                    let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
                    let n = self.inner.read(&mut buf[..want])?;
                    if n == 0 {
                        return Err(BodyError::UnexpectedEof {
                            received: self.total_size,
                            expected: None,
                        });
                    }
                    self.total_size += n as u64;
                    let remaining = remaining - n as u64;
                    self.state = if remaining == 0 {
                        ChunkedState::ChunkDataEnd
                    } else {
                        ChunkedState::ChunkData { remaining }
                    };
                    return Ok(n);
                }
                ChunkedState::ChunkDataEnd => {
                    if !self.line()?.is_empty() {
                        return Err(BodyError::InvalidChunkedEncoding {
                            detail: "expected CRLF after chunk data",
                        });
                    }
                    self.state = ChunkedState::ChunkSize;
                }
                ChunkedState::Trailers => {
                    let line = self.line()?;
                    if line.is_empty() {
                        self.state = ChunkedState::Complete;
                        continue;
                    }
                    let (name, value) = line.split_once(':').ok_or(BodyError::InvalidChunkedEncoding {
                        detail: "malformed trailer",
                    })?;
                    self.trailers.append(name.trim(), value.trim());
                }
                ChunkedState::Complete => return Ok(0),
            }
        }
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_decoded(buf).map_err(io::Error::from)
    }
}

/// Streaming chunked response encoder.
///
/// Empty writes produce no chunk; the terminating `0\r\n\r\n` is written
/// once by [`finish`](Self::finish).
#[derive(Debug)]
pub struct ChunkedEncoder<W: Write> {
    inner: W,
    finished: bool,
}

impl<W: Write> ChunkedEncoder<W> {
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    /// Frame one chunk.
    #[must_use]
    pub fn encode_chunk(chunk: &[u8]) -> Vec<u8> {
        let size = format!("{:x}", chunk.len());
        let mut out = Vec::with_capacity(size.len() + 2 + chunk.len() + 2);
        out.extend_from_slice(size.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Write one chunk; empty input writes nothing.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if self.finished {
            return Err(io::Error::other("chunked body already finished"));
        }
        write!(self.inner, "{:x}\r\n", chunk.len())?;
        self.inner.write_all(chunk)?;
        self.inner.write_all(b"\r\n")
    }

    /// Write the terminating chunk. Idempotent.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.finished {
            self.finished = true;
            self.inner.write_all(b"0\r\n\r\n")?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ChunkedEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ============================================================================
// Boundary Matching
// ============================================================================

/// Yields the bytes of an underlying stream up to a delimiter sequence.
///
/// When the sequence is reached it is consumed and the reader reports
/// end-of-data until [`resume`](Self::resume) is called. Bytes that could be
/// the start of a delimiter split across reads are held back until the
/// next read settles it. Without a sequence the reader passes everything
/// through.
#[derive(Debug)]
pub struct BoundaryReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    sequence: Option<Vec<u8>>,
    matched: bool,
    inner_eof: bool,
}

enum Scan {
    Yield(usize),
    Matched(usize),
    Fill,
}

impl<R: Read> BoundaryReader<R> {
    #[must_use]
    pub fn new(inner: R, sequence: impl Into<Vec<u8>>) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            sequence: Some(sequence.into()).filter(|s: &Vec<u8>| !s.is_empty()),
            matched: false,
            inner_eof: false,
        }
    }

    /// Replace the delimiter. Takes effect on the next read.
    pub fn set_sequence(&mut self, sequence: Option<Vec<u8>>) {
        self.sequence = sequence.filter(|s| !s.is_empty());
    }

    /// Continue past a matched delimiter.
    pub fn resume(&mut self) {
        self.matched = false;
    }

    /// Returns true if the last read stopped at the delimiter.
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.matched
    }

    /// Returns true if the underlying stream is exhausted and nothing is buffered.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.inner_eof && self.pos >= self.buf.len()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn scan(&self) -> Scan {
        let avail = &self.buf[self.pos..];
        let Some(seq) = self.sequence.as_deref() else {
            return if avail.is_empty() && !self.inner_eof {
                Scan::Fill
            } else {
                Scan::Yield(avail.len())
            };
        };
        if let Some(idx) = memmem::find(avail, seq) {
            return if idx == 0 {
                Scan::Matched(seq.len())
            } else {
                Scan::Yield(idx)
            };
        }
        if self.inner_eof {
            return Scan::Yield(avail.len());
        }
        let safe = avail.len() - partial_suffix(avail, seq);
        if safe > 0 { Scan::Yield(safe) } else { Scan::Fill }
    }

    fn fill_more(&mut self) -> io::Result<()> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let start = self.buf.len();
        self.buf.resize(start + BOUNDARY_READ_SIZE, 0);
        let n = loop {
            match self.inner.read(&mut self.buf[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e);
                }
            }
        };
        self.buf.truncate(start + n);
        if n == 0 {
            self.inner_eof = true;
        }
        Ok(())
    }
}

/// Length of the longest proper prefix of `seq` that `data` ends with.
fn partial_suffix(data: &[u8], seq: &[u8]) -> usize {
    let max = data.len().min(seq.len().saturating_sub(1));
    (1..=max)
        .rev()
        .find(|&k| data.ends_with(&seq[..k]))
        .unwrap_or(0)
}

impl<R: Read> BufRead for BoundaryReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.matched {
            return Ok(&[]);
        }
        loop {
            match self.scan() {
                Scan::Yield(n) => return Ok(&self.buf[self.pos..self.pos + n]),
                Scan::Matched(len) => {
                    self.pos += len;
                    self.matched = true;
                    return Ok(&[]);
                }
                Scan::Fill => self.fill_more()?,
            }
        }
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.buf.len());
    }
}

impl<R: Read> Read for BoundaryReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

// ============================================================================
// Size Limits
// ============================================================================

/// Fails with [`BodyError::TooLarge`] once more than `max` bytes pass through.
#[derive(Debug)]
pub struct SizeLimit<R> {
    inner: R,
    max: u64,
    read: u64,
}

impl<R: Read> SizeLimit<R> {
    /// Wrap `inner`. A `max` of 0 means unlimited.
    #[must_use]
    pub fn new(inner: R, max: u64) -> Self {
        Self { inner, max, read: 0 }
    }

    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: Read> Read for SizeLimit<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        if self.max > 0 && self.read > self.max {
            return Err(BodyError::TooLarge {
                size: self.read,
                max: self.max,
            }
            .into());
        }
        Ok(n)
    }
}

/// Returns true if `err` is a read deadline, directly or wrapped in a
/// [`BodyError::Io`].
#[must_use]
pub fn is_timed_out(err: &io::Error) -> bool {
    if parser::is_timeout(err) {
        return true;
    }
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<BodyError>())
        .is_some_and(|e| matches!(e, BodyError::Io(inner) if parser::is_timeout(inner)))
}

/// Returns true if `err` carries a [`BodyError::TooLarge`].
#[must_use]
pub fn is_too_large(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<BodyError>())
        .is_some_and(|e| matches!(e, BodyError::TooLarge { .. }))
}

// ============================================================================
// Tests
// ============================================================================
