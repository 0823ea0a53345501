//! WebSocket protocol support (RFC 6455).
//!
//! This module provides:
//! - Handshake validation and the `Sec-WebSocket-Accept` token
//! - A frame codec (mask/unmask, length escapes, control frames)
//! - [`WebSocket`], a server-side socket with a blocking mode and a
//!   threaded mode (one reader thread, one writer thread)

mod frame;
mod socket;

pub use frame::{Frame, OpCode, read_frame};
pub use socket::{Message, WebSocket, WebSocketConfig, WebSocketListener, WebSocketSender};

use crate::headers::Headers;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use std::io;

/// The GUID used for computing `Sec-WebSocket-Accept`.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// WebSocket handshake error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketHandshakeError {
    /// Missing required header.
    MissingHeader(&'static str),
    /// Invalid base64 in `Sec-WebSocket-Key`.
    InvalidKeyBase64,
    /// Invalid key length (decoded bytes must be 16).
    InvalidKeyLength { decoded_len: usize },
}

impl std::fmt::Display for WebSocketHandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHeader(h) => write!(f, "missing required websocket header: {h}"),
            Self::InvalidKeyBase64 => write!(f, "invalid Sec-WebSocket-Key (base64 decode failed)"),
            Self::InvalidKeyLength { decoded_len } => write!(
                f,
                "invalid Sec-WebSocket-Key (decoded length {decoded_len}, expected 16)"
            ),
        }
    }
}

impl std::error::Error for WebSocketHandshakeError {}

/// Compute `Sec-WebSocket-Accept` from `Sec-WebSocket-Key` (RFC 6455).
///
/// Validates that the key is base64 and decodes to 16 bytes.
pub fn websocket_accept_from_key(key: &str) -> Result<String, WebSocketHandshakeError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(WebSocketHandshakeError::MissingHeader("sec-websocket-key"));
    }

    let decoded = STANDARD
        .decode(key)
        .map_err(|_| WebSocketHandshakeError::InvalidKeyBase64)?;
    if decoded.len() != 16 {
        return Err(WebSocketHandshakeError::InvalidKeyLength {
            decoded_len: decoded.len(),
        });
    }

    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Returns true if the headers ask for a websocket upgrade.
///
/// Requires `Connection` to carry the `upgrade` token, `Upgrade: websocket`
/// and a `Sec-WebSocket-Key`.
#[must_use]
pub fn is_upgrade_request(headers: &Headers) -> bool {
    let connection_upgrade = headers.get_all("Connection").iter().any(|value| {
        value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    });
    let upgrade_websocket = headers
        .get("Upgrade")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
    connection_upgrade && upgrade_websocket && headers.contains("Sec-WebSocket-Key")
}

/// The subprotocol echoed back in the 101 response: the first listed value.
#[must_use]
pub fn selected_protocol(headers: &Headers) -> Option<&str> {
    headers
        .get("Sec-WebSocket-Protocol")?
        .split(',')
        .map(str::trim)
        .find(|p| !p.is_empty())
}

/// WebSocket protocol error.
#[derive(Debug)]
pub enum WebSocketError {
    Io(io::Error),
    Protocol(&'static str),
    /// A frame or reassembled message exceeded the configured maximum.
    PayloadTooLarge { len: u64, max: usize },
    /// The socket was closed; nothing more can be sent.
    Closed,
    Utf8(std::str::Utf8Error),
}

impl std::fmt::Display for WebSocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "websocket I/O error: {e}"),
            Self::Protocol(msg) => write!(f, "websocket protocol error: {msg}"),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "websocket payload of {len} bytes exceeds maximum {max}")
            }
            Self::Closed => write!(f, "websocket is closed"),
            Self::Utf8(e) => write!(f, "invalid utf-8 in websocket text frame: {e}"),
        }
    }
}

impl std::error::Error for WebSocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Utf8(e) => Some(e),
            Self::Protocol(_) | Self::PayloadTooLarge { .. } | Self::Closed => None,
        }
    }
}

impl From<io::Error> for WebSocketError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<std::str::Utf8Error> for WebSocketError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::Utf8(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_known_vector() {
        // RFC 6455 example
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = websocket_accept_from_key(key).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn accept_key_rejects_bad_keys() {
        assert_eq!(
            websocket_accept_from_key("  "),
            Err(WebSocketHandshakeError::MissingHeader("sec-websocket-key"))
        );
        assert_eq!(
            websocket_accept_from_key("not base64!"),
            Err(WebSocketHandshakeError::InvalidKeyBase64)
        );
        assert!(matches!(
            websocket_accept_from_key("aGVsbG8="),
            Err(WebSocketHandshakeError::InvalidKeyLength { decoded_len: 5 })
        ));
    }

    #[test]
    fn upgrade_request_detection() {
        let headers: Headers = [
            ("Connection", "keep-alive, Upgrade"),
            ("Upgrade", "WebSocket"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ]
        .into_iter()
        .collect();
        assert!(is_upgrade_request(&headers));

        let mut missing_key = headers.clone();
        missing_key.remove("Sec-WebSocket-Key");
        assert!(!is_upgrade_request(&missing_key));

        let mut plain = headers;
        plain.set("Connection", "keep-alive");
        assert!(!is_upgrade_request(&plain));
    }

    #[test]
    fn first_protocol_is_selected() {
        let headers: Headers = [("Sec-WebSocket-Protocol", " chat, superchat")]
            .into_iter()
            .collect();
        assert_eq!(selected_protocol(&headers), Some("chat"));
        assert_eq!(selected_protocol(&Headers::new()), None);
    }
}
