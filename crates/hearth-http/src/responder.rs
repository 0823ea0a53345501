//! The contract between the connection handler and the application.

use crate::body::is_timed_out;
use crate::response::{ResponseError, ResponseWriter};
use hearth_core::{Request, WebSocket, WebSocketError};
use std::io;

/// Error returned by a [`Responder`].
///
/// Any error (or panic) escaping a responder produces a 500 page when the
/// response is still untouched, and truncates the response otherwise. The
/// connection is not reused in either case.
#[derive(Debug)]
pub enum RespondError {
    Io(io::Error),
    Response(ResponseError),
    WebSocket(WebSocketError),
    /// Application failure with a description for the error page.
    Handler(String),
}

impl RespondError {
    /// Application failure with the given description.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Whether a socket deadline caused the failure. No response is
    /// attempted for these; the connection is dropped.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Io(e) | Self::Response(ResponseError::Io(e)) => is_timed_out(e),
            _ => false,
        }
    }
}

impl std::fmt::Display for RespondError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Response(e) => write!(f, "response error: {e}"),
            Self::WebSocket(e) => write!(f, "websocket error: {e}"),
            Self::Handler(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for RespondError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Response(e) => Some(e),
            Self::WebSocket(e) => Some(e),
            Self::Handler(_) => None,
        }
    }
}

impl From<io::Error> for RespondError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ResponseError> for RespondError {
    fn from(e: ResponseError) -> Self {
        Self::Response(e)
    }
}

impl From<WebSocketError> for RespondError {
    fn from(e: WebSocketError) -> Self {
        Self::WebSocket(e)
    }
}

/// Produces responses for parsed requests.
///
/// A responder that returns without writing anything declines the request;
/// the connection then tries [`respond_404`](Self::respond_404), the
/// server's default 404 handler, and finally a built-in 500 page.
///
/// Implemented for closures taking `(&mut Request, &mut ResponseWriter)`.
pub trait Responder: Send + Sync {
    /// Handle one request.
    fn respond(
        &self,
        request: &mut Request<'_>,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), RespondError>;

    /// Produce a 404 response. The status is already set to 404.
    fn respond_404(
        &self,
        _request: &mut Request<'_>,
        _response: &mut ResponseWriter<'_>,
    ) -> Result<(), RespondError> {
        Ok(())
    }

    /// Whether this responder takes over `request` as a websocket.
    fn accepts_websocket(&self, _request: &Request<'_>) -> bool {
        false
    }

    /// Run an upgraded connection. Called only after
    /// [`accepts_websocket`](Self::accepts_websocket) returned true and the
    /// handshake was sent. The socket can be driven on this thread with
    /// [`WebSocket::read_message`] or handed to threads with
    /// [`WebSocket::spawn`].
    fn serve_websocket(&self, _request: &Request<'_>, _socket: WebSocket) -> Result<(), RespondError> {
        Ok(())
    }
}

impl<F> Responder for F
where
    F: Fn(&mut Request<'_>, &mut ResponseWriter<'_>) -> Result<(), RespondError> + Send + Sync,
{
    fn respond(
        &self,
        request: &mut Request<'_>,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), RespondError> {
        self(request, response)
    }
}

/// Build a responder from a closure, pinning down its signature so the
/// arguments need no annotations.
///
/// ```
/// use hearth_http::{from_fn, Responder};
/// use std::io::Write;
///
/// let hello = from_fn(|_request, response| {
///     response.write_all(b"hello")?;
///     Ok(())
/// });
/// # fn check(_: &dyn Responder) {}
/// # check(&hello);
/// ```
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&mut Request<'_>, &mut ResponseWriter<'_>) -> Result<(), RespondError> + Send + Sync,
{
    f
}

/// The server-level fallback used when a responder declines a 404.
pub type NotFoundHandler =
    dyn Fn(&Request<'_>, &mut ResponseWriter<'_>) -> Result<(), RespondError> + Send + Sync;

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::Method;
    use std::io::Write;

    #[test]
    fn closures_are_responders() {
        let responder = from_fn(|_req, res| {
            res.write_all(b"hi")?;
            Ok(())
        });
        let mut out = Vec::new();
        let mut request = Request::new(Method::Get, "/");
        {
            let mut response = ResponseWriter::new(&mut out, "hearth");
            responder.respond(&mut request, &mut response).unwrap();
            assert!(!responder.accepts_websocket(&request));
            response.finish().unwrap();
        }
        assert!(out.ends_with(b"2\r\nhi\r\n0\r\n\r\n"));
    }

    #[test]
    fn deadlines_are_recognized_through_wrappers() {
        use crate::body::BodyError;

        let timed_out = || io::Error::from(io::ErrorKind::WouldBlock);
        assert!(RespondError::from(timed_out()).is_timeout());
        assert!(RespondError::from(ResponseError::Io(timed_out())).is_timeout());
        let wrapped = io::Error::other(BodyError::Io(timed_out()));
        assert!(RespondError::from(wrapped).is_timeout());

        assert!(!RespondError::from(io::Error::from(io::ErrorKind::ConnectionReset)).is_timeout());
        let too_large = io::Error::from(BodyError::TooLarge { size: 2, max: 1 });
        assert!(!RespondError::from(too_large).is_timeout());
        assert!(!RespondError::handler("nope").is_timeout());
    }

    #[test]
    fn error_display_and_source() {
        let err = RespondError::handler("database unavailable");
        assert_eq!(err.to_string(), "database unavailable");
        assert!(std::error::Error::source(&err).is_none());

        let err = RespondError::from(ResponseError::HeadersSent);
        assert!(matches!(err, RespondError::Response(ResponseError::HeadersSent)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
