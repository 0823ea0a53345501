//! HTTP response writer.
//!
//! A [`ResponseWriter`] holds the status line and header block until the
//! first body byte (or an explicit [`send_headers`](ResponseWriter::send_headers))
//! flushes them, after which the head is frozen. Bodies are framed either
//! with a declared `Content-Length` or with chunked transfer-coding; the two
//! are mutually exclusive and switching one on switches the other off.

use crate::body::ChunkedEncoder;
use crate::status::{forbids_body, reason_phrase};
use hearth_core::Headers;
use std::io::{self, Write};
use std::time::{Duration, SystemTime};

/// Chunked writes are coalesced up to this size before a chunk is emitted.
const CHUNK_BUFFER_SIZE: usize = 8192;

/// Error from the response writer.
#[derive(Debug)]
pub enum ResponseError {
    /// Status line is not `"<3 digits> <reason>"`.
    InvalidStatus(String),
    /// The head was already flushed; the header block is frozen.
    HeadersSent,
    /// A `Content-Length` value that is not a non-negative integer.
    InvalidContentLength(String),
    /// Header name or value containing bytes that would break framing.
    InvalidHeader(String),
    /// Writing would exceed the declared `Content-Length`.
    LengthExceeded { declared: u64, attempted: u64 },
    /// The status does not allow a body (1xx, 204, 304).
    BodyNotAllowed { status: u16 },
    /// I/O error on the underlying stream.
    Io(io::Error),
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStatus(s) => write!(f, "invalid status line: {s:?}"),
            Self::HeadersSent => write!(f, "headers already sent"),
            Self::InvalidContentLength(v) => write!(f, "invalid Content-Length: {v:?}"),
            Self::InvalidHeader(name) => write!(f, "invalid header: {name:?}"),
            Self::LengthExceeded { declared, attempted } => write!(
                f,
                "body of {attempted} bytes exceeds declared Content-Length of {declared}"
            ),
            Self::BodyNotAllowed { status } => {
                write!(f, "status {status} does not allow a response body")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ResponseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ResponseError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ResponseError> for io::Error {
    fn from(e: ResponseError) -> Self {
        match e {
            ResponseError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

fn is_valid_status(status: &str) -> bool {
    let bytes = status.as_bytes();
    bytes.len() > 4
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && bytes[3] == b' '
        && !status[4..].trim().is_empty()
        && !bytes.iter().any(|&b| b == b'\r' || b == b'\n')
}

fn check_header(name: &str, value: &str) -> Result<(), ResponseError> {
    let name_ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':');
    let value_ok = !value.bytes().any(|b| b == b'\r' || b == b'\n');
    if name_ok && value_ok {
        Ok(())
    } else {
        Err(ResponseError::InvalidHeader(name.to_string()))
    }
}

/// Writes one response onto a connection's output stream.
pub struct ResponseWriter<'a> {
    out: &'a mut dyn Write,
    status: String,
    headers: Headers,
    content_length: Option<u64>,
    written: u64,
    head_request: bool,
    headers_sent: bool,
    body_allowed: bool,
    buffer: Option<Vec<u8>>,
    finished: bool,
}

impl std::fmt::Debug for ResponseWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .field("written", &self.written)
            .field("headers_sent", &self.headers_sent)
            .finish_non_exhaustive()
    }
}

impl<'a> ResponseWriter<'a> {
    /// A writer in the default state: `200 OK`, an HTML content type, the
    /// current `Date`, `Server: <server_name>`, chunked framing and
    /// `Connection: close`.
    pub fn new(out: &'a mut dyn Write, server_name: &str) -> Self {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html; charset=utf-8");
        headers.set("Date", httpdate::fmt_http_date(SystemTime::now()));
        headers.set("Server", server_name);
        headers.set("Transfer-Encoding", "chunked");
        headers.set("Connection", "close");
        Self {
            out,
            status: "200 OK".to_string(),
            headers,
            content_length: None,
            written: 0,
            head_request: false,
            headers_sent: false,
            body_allowed: true,
            buffer: Some(Vec::with_capacity(CHUNK_BUFFER_SIZE)),
            finished: false,
        }
    }

    /// Suppress payload bytes while still accounting for them, as a `HEAD`
    /// response must.
    #[must_use]
    pub fn head_only(mut self, head: bool) -> Self {
        self.head_request = head;
        self
    }

    /// Advertise keep-alive with the given timeout, or `Connection: close`.
    pub fn set_keep_alive(&mut self, timeout_secs: Option<u64>) -> Result<(), ResponseError> {
        self.ensure_mutable()?;
        match timeout_secs {
            Some(secs) => {
                self.headers.set("Connection", "keep-alive");
                self.headers.set("Keep-Alive", format!("timeout={secs}"));
            }
            None => {
                self.headers.remove("Keep-Alive");
                self.headers.set("Connection", "close");
            }
        }
        Ok(())
    }

    /// Whether the response tells the client the connection will close.
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        self.headers
            .get_all("Connection")
            .iter()
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case("close"))
    }

    /// The status line without the protocol, e.g. `"404 Not Found"`.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status[..3].parse().unwrap_or(500)
    }

    /// Set the status line, validated as `"<number> <text>"`.
    pub fn set_status(&mut self, status: &str) -> Result<(), ResponseError> {
        self.ensure_mutable()?;
        if !is_valid_status(status) {
            return Err(ResponseError::InvalidStatus(status.to_string()));
        }
        self.status = status.to_string();
        Ok(())
    }

    /// Set the status by code with its standard reason phrase.
    pub fn set_status_code(&mut self, code: u16) -> Result<(), ResponseError> {
        if !(100..=999).contains(&code) {
            return Err(ResponseError::InvalidStatus(code.to_string()));
        }
        self.set_status(&format!("{code} {}", reason_phrase(code)))
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Replace every value of `name`. `Set-Cookie` always appends.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ResponseError> {
        self.ensure_mutable()?;
        check_header(name, value)?;
        if name.eq_ignore_ascii_case("Set-Cookie") {
            self.headers.append(name, value);
            return Ok(());
        }
        if self.framing_header(name, value)? {
            return Ok(());
        }
        self.headers.set(name, value);
        Ok(())
    }

    /// Append a value to `name`.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), ResponseError> {
        self.ensure_mutable()?;
        check_header(name, value)?;
        if self.framing_header(name, value)? {
            return Ok(());
        }
        self.headers.append(name, value);
        Ok(())
    }

    /// Remove every value of `name`. Removing `Content-Length` restores
    /// chunked framing.
    pub fn delete_header(&mut self, name: &str) -> Result<(), ResponseError> {
        self.ensure_mutable()?;
        if name.eq_ignore_ascii_case("Content-Length") {
            if self.content_length.take().is_some() {
                self.headers.remove("Content-Length");
                self.headers.set("Transfer-Encoding", "chunked");
            }
        } else {
            self.headers.remove(name);
        }
        Ok(())
    }

    /// Declare the body length, switching to fixed-length framing.
    pub fn set_content_length(&mut self, length: u64) -> Result<(), ResponseError> {
        self.set_header("Content-Length", &length.to_string())
    }

    /// The declared body length, `None` when chunked.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.content_length.is_none()
    }

    // Content-Length and Transfer-Encoding toggle each other.
    fn framing_header(&mut self, name: &str, value: &str) -> Result<bool, ResponseError> {
        if name.eq_ignore_ascii_case("Content-Length") {
            let length = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ResponseError::InvalidContentLength(value.to_string()))?;
            self.content_length = Some(length);
            self.headers.remove("Transfer-Encoding");
            self.headers.set("Content-Length", length.to_string());
            return Ok(true);
        }
        if name.eq_ignore_ascii_case("Transfer-Encoding")
            && value.trim().eq_ignore_ascii_case("chunked")
        {
            self.content_length = None;
            self.headers.remove("Content-Length");
            self.headers.set("Transfer-Encoding", "chunked");
            return Ok(true);
        }
        Ok(false)
    }

    /// Mark the response uncacheable.
    pub fn do_not_cache(&mut self) -> Result<(), ResponseError> {
        self.set_header("Pragma", "no-cache")?;
        self.set_header("Cache-Control", "no-cache")?;
        self.set_header("Expires", "-1")
    }

    /// Let clients and proxies cache the response for `max_age`.
    pub fn cache(&mut self, max_age: Duration) -> Result<(), ResponseError> {
        self.delete_header("Pragma")?;
        self.set_header(
            "Cache-Control",
            &format!("public, max-age={}", max_age.as_secs()),
        )?;
        let expires = httpdate::fmt_http_date(SystemTime::now() + max_age);
        self.set_header("Expires", &expires)
    }

    /// `301 Moved Permanently` to `location`, with an empty body.
    pub fn moved_permanently(&mut self, location: &str) -> Result<(), ResponseError> {
        self.send_redirect(301, location)
    }

    /// `302 Found` to `location`, with an empty body.
    pub fn redirect(&mut self, location: &str) -> Result<(), ResponseError> {
        self.send_redirect(302, location)
    }

    /// `303 See Other`: the request is done, continue at `location`.
    pub fn see_other(&mut self, location: &str) -> Result<(), ResponseError> {
        self.send_redirect(303, location)
    }

    fn send_redirect(&mut self, code: u16, location: &str) -> Result<(), ResponseError> {
        self.set_status_code(code)?;
        self.set_header("Location", location)?;
        self.set_content_length(0)?;
        self.send_headers()
    }

    /// Whether the head has been flushed.
    #[must_use]
    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Whether anything at all reached the stream.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.headers_sent
    }

    /// Body bytes accepted so far, including those suppressed for `HEAD`.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn ensure_mutable(&self) -> Result<(), ResponseError> {
        if self.headers_sent {
            Err(ResponseError::HeadersSent)
        } else {
            Ok(())
        }
    }

    /// Flush the status line and header block. Later calls do nothing.
    pub fn send_headers(&mut self) -> Result<(), ResponseError> {
        if self.headers_sent {
            return Ok(());
        }
        if forbids_body(self.status_code()) {
            self.body_allowed = false;
            self.content_length = None;
            self.headers.remove("Transfer-Encoding");
            self.headers.remove("Content-Type");
        }
        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(b"HTTP/1.1 ");
        head.extend_from_slice(self.status.as_bytes());
        head.extend_from_slice(b"\r\n");
        for (name, value) in self.headers.iter() {
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        self.headers_sent = true;
        self.out.write_all(&head)?;
        Ok(())
    }

    /// Write body bytes, flushing the head first if needed.
    pub fn write_body(&mut self, data: &[u8]) -> Result<(), ResponseError> {
        self.send_headers()?;
        if data.is_empty() {
            return Ok(());
        }
        if !self.body_allowed {
            return Err(ResponseError::BodyNotAllowed {
                status: self.status_code(),
            });
        }
        let attempted = self.written + data.len() as u64;
        if let Some(declared) = self.content_length {
            if attempted > declared {
                return Err(ResponseError::LengthExceeded {
                    declared,
                    attempted,
                });
            }
        }
        self.written = attempted;
        if self.head_request {
            return Ok(());
        }
        if self.content_length.is_some() {
            self.out.write_all(data)?;
            return Ok(());
        }
        if self.buffer.is_none() || data.len() >= CHUNK_BUFFER_SIZE {
            self.flush_chunk_buffer()?;
            ChunkedEncoder::new(&mut *self.out).write_chunk(data)?;
            return Ok(());
        }
        if self
            .buffer
            .as_ref()
            .is_some_and(|b| b.len() + data.len() > CHUNK_BUFFER_SIZE)
        {
            self.flush_chunk_buffer()?;
        }
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.extend_from_slice(data);
        }
        Ok(())
    }

    /// Declare the length of `body` (when the head is still open) and write it.
    pub fn send_body(&mut self, body: &[u8]) -> Result<(), ResponseError> {
        if !self.headers_sent && self.written == 0 && !forbids_body(self.status_code()) {
            self.set_content_length(body.len() as u64)?;
        }
        self.write_body(body)
    }

    fn flush_chunk_buffer(&mut self) -> io::Result<()> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };
        if !buffer.is_empty() {
            ChunkedEncoder::new(&mut *self.out).write_chunk(buffer)?;
            buffer.clear();
        }
        Ok(())
    }

    /// Stop coalescing chunked writes; later writes go straight to the
    /// encoder. Used for large transfers.
    pub fn disable_buffer(&mut self) -> Result<(), ResponseError> {
        self.flush_chunk_buffer()?;
        self.buffer = None;
        Ok(())
    }

    /// Complete the response: flush the head, pad an underfilled fixed-length
    /// body with zeros or terminate a chunked one, and flush the stream.
    /// Idempotent.
    pub fn finish(&mut self) -> Result<(), ResponseError> {
        if self.finished {
            return Ok(());
        }
        self.send_headers()?;
        self.finished = true;
        if self.body_allowed && !self.head_request {
            match self.content_length {
                Some(declared) => {
                    let mut missing = declared.saturating_sub(self.written);
                    if missing > 0 {
                        log::trace!("padding response body with {missing} zero bytes");
                    }
                    let zeros = [0u8; 1024];
                    while missing > 0 {
                        let n = missing.min(zeros.len() as u64) as usize;
                        self.out.write_all(&zeros[..n])?;
                        missing -= n as u64;
                    }
                    self.written = self.written.max(declared);
                }
                None => {
                    self.flush_chunk_buffer()?;
                    ChunkedEncoder::new(&mut *self.out).finish()?;
                }
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

impl Write for ResponseWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_body(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_headers()?;
        if self.body_allowed && !self.head_request && self.content_length.is_none() {
            self.flush_chunk_buffer()?;
        }
        self.out.flush()
    }
}
