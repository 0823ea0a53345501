//! Request-line and header-block reading.
//!
//! Lines are read from a [`BufRead`] one at a time, so nothing past the
//! header block is consumed; the body stays in the reader for the body
//! decoders.

use hearth_core::{Headers, Method};
use memchr::memchr;
use std::io::{self, BufRead};

/// HTTP parsing error.
#[derive(Debug)]
pub enum ParseError {
    /// A line ran past its size limit (the request line answers 414).
    LineTooLong { limit: usize },
    /// The header block ran past its cumulative size limit.
    HeadersTooLarge { limit: usize },
    /// The request line did not have the form `METHOD target HTTP/x.y`.
    InvalidRequestLine,
    /// The method token is not one this server implements.
    UnsupportedMethod(String),
    /// A header line without a name or colon.
    InvalidHeader,
    /// A read deadline fired.
    TimedOut,
    /// I/O error, including a connection closed mid-line.
    Io(io::Error),
}

impl ParseError {
    /// Classify an I/O error, separating read deadlines from real failures.
    #[must_use]
    pub fn from_io(e: io::Error) -> Self {
        if is_timeout(&e) {
            Self::TimedOut
        } else {
            Self::Io(e)
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LineTooLong { limit } => write!(f, "line exceeds {limit} bytes"),
            Self::HeadersTooLarge { limit } => write!(f, "header block exceeds {limit} bytes"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::UnsupportedMethod(m) => write!(f, "unsupported HTTP method: {m}"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TimedOut => write!(f, "read timed out"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        Self::from_io(e)
    }
}

/// Returns true for the error kinds a socket read deadline produces.
#[must_use]
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ============================================================================
// Line reading
// ============================================================================

/// Read one line terminated by `\n`, stripping `\r\n` or `\n`.
///
/// Returns `Ok(None)` if the stream ends before any byte. `limit` bounds the
/// line content, excluding the terminator. Invalid UTF-8 is replaced.
pub fn read_line<R: BufRead + ?Sized>(
    reader: &mut R,
    limit: usize,
) -> Result<Option<String>, ParseError> {
    let mut line = Vec::new();
    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ParseError::from_io(e)),
        };
        if available.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            return Err(ParseError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-line",
            )));
        }

        let (take, done) = match memchr(b'\n', available) {
            Some(idx) => (idx + 1, true),
            None => (available.len(), false),
        };
        if line.len() + take > limit.saturating_add(2) {
            return Err(ParseError::LineTooLong { limit });
        }
        line.extend_from_slice(&available[..take]);
        reader.consume(take);
        if done {
            break;
        }
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    if line.len() > limit {
        return Err(ParseError::LineTooLong { limit });
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

// ============================================================================
// Request line
// ============================================================================

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    target: String,
    version: String,
}

impl RequestLine {
    /// Parse `METHOD SP target SP HTTP/x.y`.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::InvalidRequestLine` if the line does not have
    /// three tokens or the version does not start with `HTTP/`.
    /// Returns `ParseError::UnsupportedMethod` for unknown method tokens.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.split_ascii_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::InvalidRequestLine);
        };
        if !version.starts_with("HTTP/") {
            return Err(ParseError::InvalidRequestLine);
        }
        let method = Method::from_bytes(method.as_bytes())
            .ok_or_else(|| ParseError::UnsupportedMethod(method.to_string()))?;
        Ok(Self {
            method,
            target: target.to_string(),
            version: version.to_string(),
        })
    }

    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// The raw request-target.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns true for `HTTP/1.0` (and older) requests.
    #[must_use]
    pub fn is_http10(&self) -> bool {
        self.version == "HTTP/1.0" || self.version == "HTTP/0.9"
    }

    pub(crate) fn into_target(self) -> String {
        self.target
    }
}

/// Read the next request line, skipping blank lines before it.
///
/// Returns `Ok(None)` if the peer closed the connection first.
pub fn read_request_line<R: BufRead + ?Sized>(
    reader: &mut R,
    limit: usize,
) -> Result<Option<String>, ParseError> {
    loop {
        match read_line(reader, limit)? {
            None => return Ok(None),
            Some(line) if line.trim().is_empty() => {}
            Some(line) => return Ok(Some(line)),
        }
    }
}

// ============================================================================
// Header block
// ============================================================================

/// Read header lines up to and including the blank line.
///
/// `limit` bounds the whole block. Lines starting with a space or tab
/// continue the previous header's last value.
pub fn read_headers<R: BufRead + ?Sized>(reader: &mut R, limit: usize) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();
    let mut total = 0usize;
    let mut last_name: Option<String> = None;

    loop {
        let remaining = limit.saturating_sub(total);
        let line = match read_line(reader, remaining) {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Err(ParseError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed in header block",
                )));
            }
            Err(ParseError::LineTooLong { .. }) => return Err(ParseError::HeadersTooLarge { limit }),
            Err(e) => return Err(e),
        };
        total += line.len() + 2;
        if total > limit {
            return Err(ParseError::HeadersTooLarge { limit });
        }
        if line.is_empty() {
            return Ok(headers);
        }

        if line.starts_with([' ', '\t']) {
            let name = last_name.as_deref().ok_or(ParseError::InvalidHeader)?;
            if !headers.extend_last(name, line.trim()) {
                return Err(ParseError::InvalidHeader);
            }
            continue;
        }

        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let name = name.trim();
        if name.is_empty() || name.contains([' ', '\t']) {
            return Err(ParseError::InvalidHeader);
        }
        headers.append(name, value.trim());
        last_name = Some(name.to_string());
    }
}
