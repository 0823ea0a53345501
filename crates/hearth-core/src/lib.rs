//! Core types for the hearth HTTP/1.1 server.
//!
//! This crate holds everything that does not own a socket:
//! - [`Headers`], an ordered case-insensitive multimap
//! - [`Request`], [`Method`] and the streaming request [`Body`]
//! - [`UploadedFile`] for spooled multipart uploads
//! - The [`websocket`] handshake, frame codec and socket
//!
//! The wire engine lives in `hearth-http`.

#![deny(unsafe_code)]

mod headers;
mod request;
pub mod websocket;

pub use headers::Headers;
pub use request::{Body, Method, Request, UploadedFile};
pub use websocket::{
    Frame, Message, OpCode, WS_GUID, WebSocket, WebSocketConfig, WebSocketError,
    WebSocketHandshakeError, WebSocketListener, WebSocketSender, read_frame,
    websocket_accept_from_key,
};
