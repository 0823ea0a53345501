//! The per-connection request loop.
//!
//! Each exchange reads a request line and header block, frames the body,
//! hands the request to the responder, runs the 404 fallbacks when nothing
//! was written, finalizes the response and cleans up. The connection is
//! reused only if every step left the byte stream in a known state.

use crate::body::{ChunkedReader, LengthReader, SizeLimit, is_too_large};
use crate::cookie::parse_cookies;
use crate::multipart::{parse_boundary, read_multipart};
use crate::pages;
use crate::parser::{ParseError, RequestLine, read_headers, read_request_line};
use crate::query::{QueryString, percent_decode_path};
use crate::responder::RespondError;
use crate::response::{ResponseError, ResponseWriter};
use crate::server::Shared;
use crate::status::{is_redirect, status_line};
use crate::trust::{client_addr, effective_host, forwarded_https};
use hearth_core::websocket::{is_upgrade_request, selected_protocol, websocket_accept_from_key};
use hearth_core::{Body, Headers, Request, WebSocket};
use log::{debug, trace, warn};
use std::any::Any;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

/// Written in place of a response when the request line is unusable.
const MALFORMED_REQUEST: &[u8] =
    b"Please send a full HTTP request.  If you are seeing this message, you may have an out of date browser.";

/// How long a closing connection keeps reading so the peer sees our last
/// response instead of a reset.
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);

enum Outcome {
    KeepAlive,
    Close,
    Upgrade(Box<Upgrade>),
}

struct Upgrade {
    request: Request<'static>,
    accept: String,
    protocol: Option<String>,
}

/// The body stream selected by the request's framing headers.
enum Framed<R> {
    None,
    Length(LengthReader<R>),
    Chunked(ChunkedReader<R>),
}

impl<R: BufRead> Framed<R> {
    fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    fn is_complete(&self) -> bool {
        match self {
            Self::None => true,
            Self::Length(reader) => reader.is_complete(),
            Self::Chunked(reader) => reader.is_complete(),
        }
    }

    /// Consume what the responder left unread. Returns false when more than
    /// `limit` bytes remain or the body is broken.
    fn drain(&mut self, limit: u64) -> bool {
        if let Self::Length(reader) = self {
            if reader.remaining() > limit {
                return false;
            }
        }
        if self.is_complete() {
            return true;
        }
        match io::copy(&mut self.by_ref().take(limit), &mut io::sink()) {
            Ok(drained) => {
                trace!("drained {drained} unread body bytes");
                self.is_complete()
            }
            Err(e) => {
                trace!("drain failed: {e}");
                false
            }
        }
    }
}

impl<R: BufRead> Read for Framed<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::None => Ok(0),
            Self::Length(reader) => reader.read(buf),
            Self::Chunked(reader) => reader.read(buf),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("responder panicked: {message}")
}

fn error_message(code: u16) -> &'static str {
    match code {
        400 => "The request could not be understood by the server.",
        413 => "The request is larger than the server is willing to process.",
        414 => "The request URI is longer than the server is willing to interpret.",
        501 => "The request method is not supported by this server.",
        _ => "The request could not be processed.",
    }
}

/// Write a complete one-off page that closes the connection.
fn write_page(
    out: &mut dyn Write,
    server_name: &str,
    code: u16,
    html: &str,
    head: bool,
) -> Result<(), ResponseError> {
    let mut response = ResponseWriter::new(out, server_name).head_only(head);
    response.set_status_code(code)?;
    response.send_body(html.as_bytes())?;
    response.finish()
}

fn send_error(out: &mut dyn Write, server_name: &str, code: u16, host: Option<&str>) {
    let html = pages::error_page(
        &status_line(code),
        error_message(code),
        &pages::signature(server_name, host),
    );
    if let Err(e) = write_page(out, server_name, code, &html, false) {
        debug!("failed to send {code} response: {e}");
    }
}

fn connection_tokens(headers: &Headers) -> impl Iterator<Item = String> + '_ {
    headers
        .get_all("Connection")
        .iter()
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
}

/// Whether the client allows the connection to be reused.
fn wants_keep_alive(headers: &Headers, http10: bool) -> bool {
    let mut keep_alive = !http10;
    for token in connection_tokens(headers) {
        match token.as_str() {
            "close" => return false,
            "keep-alive" => keep_alive = true,
            _ => {}
        }
    }
    keep_alive
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_all("Transfer-Encoding")
        .iter()
        .flat_map(|v| v.split(','))
        .next_back()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn expects_continue(headers: &Headers) -> bool {
    headers
        .get("Expect")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
}

/// Serve `stream` until the client leaves, an error ends the connection,
/// or it is upgraded to a websocket.
pub(crate) fn serve_connection(stream: TcpStream, id: u64, shared: &Shared) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            debug!("connection {id}: no peer address: {e}");
            return;
        }
    };
    debug!("connection {id} accepted from {peer}");
    match Connection::new(stream, peer, id, shared) {
        Ok(connection) => connection.run(),
        Err(e) => debug!("connection {id}: setup failed: {e}"),
    }
    debug!("connection {id} closed");
}

struct Connection<'s> {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    shared: &'s Shared,
    served: u64,
}

impl<'s> Connection<'s> {
    fn new(stream: TcpStream, peer: SocketAddr, id: u64, shared: &'s Shared) -> io::Result<Self> {
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(Self {
            id,
            peer,
            stream,
            reader,
            writer,
            shared,
            served: 0,
        })
    }

    fn run(mut self) {
        loop {
            match self.exchange() {
                Outcome::KeepAlive if self.shared.is_draining() => {
                    trace!("connection {}: server draining, closing", self.id);
                    break;
                }
                Outcome::KeepAlive => {
                    self.served += 1;
                    trace!("connection {}: kept alive after {} requests", self.id, self.served);
                }
                Outcome::Close => break,
                Outcome::Upgrade(upgrade) => {
                    self.upgrade(*upgrade);
                    return;
                }
            }
        }
        self.close();
    }

    /// Flush, stop sending, and read for a moment so the client receives
    /// the final response before the socket goes away.
    fn close(mut self) {
        let _ = self.writer.flush();
        let _ = self.stream.shutdown(Shutdown::Write);
        if self.stream.set_read_timeout(Some(LINGER_TIMEOUT)).is_ok() {
            let limit = self.shared.config.drain_limit();
            let _ = io::copy(&mut (&mut self.reader).take(limit), &mut io::sink());
        }
    }

    fn set_timeout(&self, timeout: Duration) -> bool {
        match self.stream.set_read_timeout(Some(timeout)) {
            Ok(()) => true,
            Err(e) => {
                debug!("connection {}: cannot set read timeout: {e}", self.id);
                false
            }
        }
    }

    fn exchange(&mut self) -> Outcome {
        let shared = self.shared;
        let config = &shared.config;
        let server_name = config.server_name();
        let wait = if self.served == 0 {
            config.first_request_timeout()
        } else {
            config.next_request_timeout()
        };
        if !self.set_timeout(wait) {
            return Outcome::Close;
        }

        let line = match read_request_line(&mut self.reader, config.request_uri_size_limit()) {
            Ok(Some(line)) => line,
            Ok(None) => return Outcome::Close,
            Err(ParseError::TimedOut) => {
                trace!("connection {}: idle timeout", self.id);
                return Outcome::Close;
            }
            Err(ParseError::LineTooLong { .. }) => {
                send_error(&mut self.writer, server_name, 414, None);
                return Outcome::Close;
            }
            Err(e) => {
                debug!("connection {}: reading request line: {e}", self.id);
                return Outcome::Close;
            }
        };
        if !self.set_timeout(config.read_timeout()) {
            return Outcome::Close;
        }
        trace!("connection {}: {line}", self.id);

        let request_line = match RequestLine::parse(&line) {
            Ok(request_line) => request_line,
            Err(ParseError::UnsupportedMethod(method)) => {
                debug!("connection {}: unsupported method {method:?}", self.id);
                send_error(&mut self.writer, server_name, 501, None);
                return Outcome::Close;
            }
            Err(_) => {
                let _ = self
                    .writer
                    .write_all(MALFORMED_REQUEST)
                    .and_then(|()| self.writer.flush());
                return Outcome::Close;
            }
        };

        let headers = match read_headers(&mut self.reader, config.header_size_limit()) {
            Ok(headers) => headers,
            Err(ParseError::HeadersTooLarge { .. }) => {
                send_error(&mut self.writer, server_name, 413, None);
                return Outcome::Close;
            }
            Err(ParseError::InvalidHeader) => {
                send_error(&mut self.writer, server_name, 400, None);
                return Outcome::Close;
            }
            Err(e) => {
                debug!("connection {}: reading headers: {e}", self.id);
                return Outcome::Close;
            }
        };

        let keep_alive = wants_keep_alive(&headers, request_line.is_http10());
        let version = request_line.version().to_string();
        let mut request: Request<'static> =
            Request::new(request_line.method(), request_line.into_target());
        let path = percent_decode_path(request.path()).into_owned();
        if !path.starts_with('/') {
            send_error(&mut self.writer, server_name, 400, None);
            return Outcome::Close;
        }
        request.set_path(path);
        if let Some(query) = request.query() {
            let params = QueryString::parse(query).decoded_pairs();
            request.set_params(params);
        }
        request.set_version(version);
        let cookies = parse_cookies(headers.get_all("Cookie").iter().map(String::as_str));
        request.set_cookies(cookies);
        let trust = &*shared.trust;
        request.set_addrs(self.peer, client_addr(self.peer.ip(), &headers, trust));
        request.set_host(effective_host(self.peer.ip(), &headers, trust));
        request.set_secure(forwarded_https(self.peer.ip(), &headers, trust));
        *request.headers_mut() = headers;

        if is_upgrade_request(request.headers()) && shared.responder.accepts_websocket(&request) {
            let key = request.header("Sec-WebSocket-Key").unwrap_or_default();
            return match websocket_accept_from_key(key) {
                Ok(accept) => {
                    let protocol = selected_protocol(request.headers()).map(str::to_string);
                    Outcome::Upgrade(Box::new(Upgrade {
                        request,
                        accept,
                        protocol,
                    }))
                }
                Err(e) => {
                    debug!("connection {}: bad websocket handshake: {e}", self.id);
                    send_error(&mut self.writer, server_name, 400, request.host());
                    Outcome::Close
                }
            };
        }

        self.dispatch(request, keep_alive)
    }

    /// Frame the body, run the responder and its fallbacks, finalize and
    /// clean up.
    fn dispatch(&mut self, request: Request<'static>, mut keep_alive: bool) -> Outcome {
        let Self {
            id,
            reader,
            writer,
            shared,
            ..
        } = self;
        let id = *id;
        let shared: &Shared = shared;
        let config = &shared.config;
        let server_name = config.server_name();
        let host = request.host().map(str::to_string);
        let host = host.as_deref();

        let chunked = is_chunked(request.headers());
        let content_length = if chunked {
            None
        } else {
            match request.header("Content-Length").map(|v| v.trim().parse::<u64>()) {
                None => None,
                Some(Ok(length)) => Some(length),
                Some(Err(_)) => {
                    send_error(writer, server_name, 400, host);
                    return Outcome::Close;
                }
            }
        };
        let content_type = request.header("Content-Type").unwrap_or_default().to_string();
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let multipart = media_type == "multipart/form-data";
        let urlencoded = media_type == "application/x-www-form-urlencoded";
        let limit = if multipart {
            config.upload_limit()
        } else if urlencoded {
            config.post_limit()
        } else {
            0
        };

        if let Some(length) = content_length {
            if limit > 0 && length > limit {
                debug!("connection {id}: body of {length} bytes over limit {limit}");
                send_error(writer, server_name, 413, host);
                return Outcome::Close;
            }
        }
        if (chunked || content_length.is_some_and(|n| n > 0)) && expects_continue(request.headers()) {
            if let Err(e) = writer
                .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
                .and_then(|()| writer.flush())
            {
                debug!("connection {id}: sending 100 Continue: {e}");
                return Outcome::Close;
            }
        }

        let mut framed = if chunked {
            Framed::Chunked(ChunkedReader::new(&mut *reader, limit))
        } else if let Some(length) = content_length {
            Framed::Length(LengthReader::new(&mut *reader, length))
        } else {
            Framed::None
        };
        // Declared after `framed` so it is dropped first.
        let mut request: Request<'_> = request;

        if multipart {
            let boundary = match parse_boundary(&content_type) {
                Ok(boundary) => boundary,
                Err(e) => {
                    debug!("connection {id}: {e}");
                    send_error(writer, server_name, 400, host);
                    return Outcome::Close;
                }
            };
            match read_multipart(&mut framed, &boundary, &config.multipart_limits()) {
                Ok(form) => {
                    request.set_form(form.fields);
                    request.set_uploads(form.files);
                }
                Err(e) => {
                    debug!("connection {id}: multipart body rejected: {e}");
                    if let Some(code) = e.status() {
                        send_error(writer, server_name, code, host);
                    }
                    return Outcome::Close;
                }
            }
        } else if urlencoded {
            let mut raw = Vec::new();
            match SizeLimit::new(&mut framed, config.post_limit()).read_to_end(&mut raw) {
                Ok(_) => {}
                Err(e) if is_too_large(&e) => {
                    send_error(writer, server_name, 413, host);
                    return Outcome::Close;
                }
                Err(e) => {
                    debug!("connection {id}: reading form body: {e}");
                    return Outcome::Close;
                }
            }
            let text = String::from_utf8_lossy(&raw);
            request.set_form(QueryString::parse(&text).decoded_pairs());
        } else if !framed.is_none() {
            request.set_body(Body::Stream(Box::new(&mut framed)));
        }

        let head = request.is_head();
        let signature = pages::signature(server_name, host);
        let mut response = ResponseWriter::new(&mut *writer, server_name).head_only(head);
        let advertised = keep_alive.then_some(config.keep_alive_timeout_secs());
        if let Err(e) = response.set_keep_alive(advertised) {
            debug!("connection {id}: {e}");
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            respond_with_fallbacks(shared, &mut request, &mut response, &signature)
        }));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) if e.is_timeout() => {
                debug!("connection {id}: deadline expired mid-request: {e}");
                return Outcome::Close;
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        match failure {
            Some(details) if response.is_committed() => {
                warn!("connection {id}: responder failed mid-response, truncating: {details}");
                keep_alive = false;
                if let Err(e) = response.finish() {
                    debug!("connection {id}: finishing truncated response: {e}");
                }
            }
            Some(details) => {
                warn!("connection {id}: responder failed, sending 500: {details}");
                keep_alive = false;
                let html = pages::internal_error_page(&details, &signature);
                if let Err(e) = write_page(&mut *writer, server_name, 500, &html, head) {
                    debug!("connection {id}: sending 500: {e}");
                }
            }
            None => {
                if response.closes_connection() {
                    keep_alive = false;
                }
                if let Err(e) = response.finish() {
                    debug!("connection {id}: finishing response: {e}");
                    keep_alive = false;
                }
            }
        }

        let uploads = request.take_uploads();
        drop(request);
        for upload in uploads {
            let path = upload.path().to_path_buf();
            if let Err(e) = upload.delete() {
                warn!("could not delete upload {}: {e}", path.display());
            }
        }
        if keep_alive && !framed.drain(config.drain_limit()) {
            trace!("connection {id}: unread request body, closing");
            keep_alive = false;
        }
        if let Err(e) = writer.flush() {
            debug!("connection {id}: flush failed: {e}");
            keep_alive = false;
        }
        trace!("connection {id}: keep-alive {keep_alive}");
        if keep_alive {
            Outcome::KeepAlive
        } else {
            Outcome::Close
        }
    }

    /// Send the 101 handshake and hand the socket to the responder.
    fn upgrade(self, upgrade: Upgrade) {
        let Upgrade {
            request,
            accept,
            protocol,
        } = upgrade;
        let Self {
            id,
            stream,
            reader,
            mut writer,
            shared,
            ..
        } = self;

        let mut head = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\nServer: {}\r\n",
            shared.config.server_name()
        );
        if let Some(protocol) = protocol {
            head.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        head.push_str("\r\n");
        if let Err(e) = writer
            .write_all(head.as_bytes())
            .and_then(|()| writer.flush())
        {
            debug!("connection {id}: sending websocket handshake: {e}");
            return;
        }

        let halves = stream
            .set_read_timeout(None)
            .and_then(|()| Ok((stream.try_clone()?, stream.try_clone()?)));
        let (write_half, shutdown_half) = match halves {
            Ok(halves) => halves,
            Err(e) => {
                debug!("connection {id}: preparing websocket: {e}");
                return;
            }
        };
        let socket = WebSocket::new(
            Box::new(reader),
            Box::new(write_half),
            shared.config.websocket_config(),
        )
        .with_shutdown(move || {
            let _ = shutdown_half.shutdown(Shutdown::Both);
        });
        debug!("connection {id} upgraded to websocket {}", socket.id());
        if let Err(e) = shared.responder.serve_websocket(&request, socket) {
            warn!("connection {id}: websocket responder failed: {e}");
        }
    }
}

fn respond_with_fallbacks(
    shared: &Shared,
    request: &mut Request<'_>,
    response: &mut ResponseWriter<'_>,
    signature: &str,
) -> Result<(), RespondError> {
    shared.responder.respond(request, response)?;
    if response.is_committed() {
        return Ok(());
    }

    if is_redirect(response.status_code()) {
        if let [location] = response.headers().get_all("Location") {
            let html = pages::redirect_page(response.status(), location, signature);
            response.send_body(html.as_bytes())?;
            return Ok(());
        }
    }

    response.set_status_code(404)?;
    shared.responder.respond_404(request, response)?;
    if response.is_committed() {
        return Ok(());
    }
    if let Some(not_found) = &shared.not_found {
        not_found(request, response)?;
        if response.is_committed() {
            return Ok(());
        }
    }

    response.set_status_code(500)?;
    response.set_header("Content-Type", "text/html; charset=utf-8")?;
    response.send_body(pages::missing_404_page(signature).as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().copied().collect()
    }

    #[test]
    fn keep_alive_rules() {
        assert!(wants_keep_alive(&headers(&[]), false));
        assert!(!wants_keep_alive(&headers(&[]), true));
        assert!(wants_keep_alive(&headers(&[("Connection", "Keep-Alive")]), true));
        assert!(!wants_keep_alive(&headers(&[("Connection", "keep-alive, close")]), false));
        assert!(wants_keep_alive(&headers(&[("Connection", "Upgrade")]), false));
    }

    #[test]
    fn chunked_is_the_final_coding() {
        assert!(is_chunked(&headers(&[("Transfer-Encoding", "chunked")])));
        assert!(is_chunked(&headers(&[("Transfer-Encoding", "gzip, Chunked")])));
        assert!(!is_chunked(&headers(&[("Transfer-Encoding", "chunked, gzip")])));
        assert!(!is_chunked(&headers(&[])));
    }

    #[test]
    fn drain_consumes_small_leftovers() {
        let mut framed = Framed::Length(LengthReader::new(Cursor::new(b"abcdefNEXT".to_vec()), 6));
        let mut first = [0u8; 2];
        framed.read_exact(&mut first).unwrap();
        assert!(framed.drain(1024));
        let Framed::Length(reader) = framed else {
            unreachable!()
        };
        assert!(reader.is_complete());
    }

    #[test]
    fn drain_refuses_large_leftovers() {
        let mut framed = Framed::Length(LengthReader::new(Cursor::new(vec![0u8; 100]), 100));
        assert!(!framed.drain(10));
    }

    #[test]
    fn drain_chunked_body() {
        let data = b"3\r\nabc\r\n0\r\n\r\nGET".to_vec();
        let mut framed = Framed::Chunked(ChunkedReader::new(Cursor::new(data), 0));
        assert!(!framed.is_complete());
        assert!(framed.drain(1024));
        assert!(framed.is_complete());
    }

    #[test]
    fn panic_messages() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "responder panicked: boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "responder panicked: bang");
    }
}
