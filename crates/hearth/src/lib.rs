//! Thread-per-connection HTTP/1.1 server engine with WebSocket support.
//!
//! hearth serves each accepted connection on its own thread with plain
//! blocking I/O. Applications implement a single [`Responder`] that sees a
//! parsed [`Request`] and writes through a [`ResponseWriter`]; everything
//! below that (framing, keep-alive, forms, uploads, ranges, websocket
//! upgrades) is handled by the engine.
//!
//! # Quick Start
//!
//! ```no_run
//! use hearth::prelude::*;
//! use std::io::Write;
//!
//! struct Hello;
//!
//! impl Responder for Hello {
//!     fn respond(
//!         &self,
//!         request: &mut Request<'_>,
//!         response: &mut ResponseWriter<'_>,
//!     ) -> Result<(), RespondError> {
//!         match request.path() {
//!             "/" => {
//!                 let name = request.param("name").unwrap_or("world").to_string();
//!                 write!(response, "<h1>hello {}</h1>", hearth::pages::html_escape(&name))?;
//!             }
//!             _ => {} // declined: the 404 chain takes over
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let config = ServerConfig::new().with_bind_addr("0.0.0.0:8080");
//! Server::new(config, Hello).serve()?;
//! # Ok::<(), ServerError>(())
//! ```
//!
//! # Crate Structure
//!
//! - [`hearth_core`]: headers, requests, uploads and the websocket codec
//! - [`hearth_http`]: the connection engine, response writer and server

#![forbid(unsafe_code)]

pub use hearth_core as core;
pub use hearth_http as http;

pub use hearth_core::{
    Body, Headers, Message, Method, Request, UploadedFile, WebSocket, WebSocketConfig,
    WebSocketError, WebSocketListener, WebSocketSender,
};
pub use hearth_http::{
    NotFoundHandler, ProxyTrust, RespondError, Responder, ResponseError, ResponseWriter, Server,
    ServerConfig, ServerError, ServerHandle, TrustedProxies, from_fn, pages, status,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Message, Method, Request, RespondError, Responder, ResponseWriter, Server, ServerConfig,
        ServerError, ServerHandle, WebSocket, from_fn,
    };
}

/// Wire-level building blocks, for embedding the codecs without the server.
pub mod codec {
    pub use hearth_core::{Frame, OpCode, read_frame, websocket_accept_from_key};
    pub use hearth_http::{
        BoundaryReader, ChunkedEncoder, ChunkedReader, LengthReader, MultipartForm,
        MultipartLimits, QueryString, RequestLine, SizeLimit, parse_cookies, percent_decode,
        percent_decode_path, read_headers, read_multipart,
    };
}
