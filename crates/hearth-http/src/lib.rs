//! Blocking HTTP/1.1 server engine.
//!
//! This crate owns the wire-level life of a connection: reading the request
//! line and headers, framing request bodies, writing framed responses and
//! upgrading to websockets. Applications plug in through a single
//! [`Responder`].
//!
//! # Features
//!
//! - Keep-alive with per-phase read deadlines
//! - Fixed-length and chunked bodies in both directions
//! - URL-encoded and `multipart/form-data` forms with spooled uploads
//! - Conditional and single-range resource responses
//! - Trusted-proxy handling of `X-Forwarded-For` and `X-Forwarded-Host`
//! - Websocket upgrade handed to `hearth-core`'s socket
//!
//! # Example
//!
//! ```no_run
//! use hearth_http::{from_fn, Server, ServerConfig};
//! use std::io::Write;
//!
//! let server = Server::new(
//!     ServerConfig::new(),
//!     from_fn(|request, response| {
//!         if request.path() != "/" {
//!             return Ok(()); // falls through to the 404 chain
//!         }
//!         response.write_all(b"<h1>hello</h1>")?;
//!         Ok(())
//!     }),
//! );
//! server.serve()?;
//! # Ok::<(), hearth_http::ServerError>(())
//! ```

#![deny(unsafe_code)]

pub mod body;
mod config;
mod connection;
mod cookie;
pub mod multipart;
pub mod pages;
mod parser;
mod query;
mod resource;
mod responder;
mod response;
mod server;
pub mod status;
mod trust;

pub use body::{BodyError, BoundaryReader, ChunkedEncoder, ChunkedReader, LengthReader, SizeLimit};
pub use config::ServerConfig;
pub use cookie::parse_cookies;
pub use multipart::{MultipartError, MultipartForm, MultipartLimits, read_multipart};
pub use parser::{ParseError, RequestLine, read_headers, read_line, read_request_line};
pub use query::{QueryString, percent_decode, percent_decode_path};
pub use resource::{parse_range, weak_etag};
pub use responder::{NotFoundHandler, RespondError, Responder, from_fn};
pub use response::{ResponseError, ResponseWriter};
pub use server::{Server, ServerError, ServerHandle, is_fatal_accept_error};
pub use trust::{ProxyTrust, TrustedProxies, client_addr, effective_host, forwarded_https};
