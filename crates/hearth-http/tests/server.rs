//! End-to-end tests against a live server on a loopback socket.

use hearth_core::{Frame, Headers, OpCode, Request, WebSocket, read_frame};
use hearth_http::{
    ChunkedReader, LengthReader, RespondError, Responder, ResponseWriter, Server, ServerConfig,
    ServerHandle, read_headers, read_line,
};
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

// ============================================================================
// Harness
// ============================================================================

struct App;

impl Responder for App {
    fn respond(
        &self,
        request: &mut Request<'_>,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), RespondError> {
        match request.path() {
            "/echo-path" => {
                let path = request.path().to_string();
                response.write_all(path.as_bytes())?;
            }
            "/query" => {
                let name = request.param("name").unwrap_or("nobody").to_string();
                response.write_all(name.as_bytes())?;
            }
            "/cookie" => {
                let session = request.cookie("session").unwrap_or("none").to_string();
                response.write_all(session.as_bytes())?;
            }
            "/client" => {
                let line = format!(
                    "{} {}",
                    request.client_addr(),
                    request.host().unwrap_or("-")
                );
                response.write_all(line.as_bytes())?;
            }
            "/body" => {
                let body = request.body_mut().read_to_vec(1 << 20)?;
                response.set_header("Content-Type", "application/octet-stream")?;
                response.send_body(&body)?;
            }
            "/ignore-body" => response.send_body(b"ignored")?,
            "/form" => {
                let line = format!(
                    "{},{}",
                    request.form_value("a").unwrap_or("-"),
                    request.form_value("b").unwrap_or("-")
                );
                response.write_all(line.as_bytes())?;
            }
            "/upload" => {
                let title = request.form_value("title").unwrap_or("-").to_string();
                let Some(upload) = request.upload("file") else {
                    return Err(RespondError::handler("no upload"));
                };
                let contents = String::from_utf8_lossy(&upload.bytes()?).into_owned();
                let line = format!("{title}:{}:{contents}", upload.filename());
                response.write_all(line.as_bytes())?;
            }
            "/range" => {
                let data: Vec<u8> = (0..100u8).collect();
                response.send_resource(request, Cursor::new(data), 100, None)?;
            }
            "/fixed" => {
                response.set_content_length(10)?;
                response.write_all(b"short")?;
            }
            "/empty" => {
                response.set_status("204 No Content")?;
                response.send_headers()?;
            }
            "/redirect" => {
                response.set_status("302 Found")?;
                response.set_header("Location", "/next?a=1&b=2")?;
            }
            "/fail" => return Err(RespondError::handler("database on fire")),
            "/fail-late" => {
                response.write_all(b"partial")?;
                response.flush()?;
                return Err(RespondError::handler("lost the database midway"));
            }
            "/panic" => panic!("responder exploded"),
            _ => {}
        }
        Ok(())
    }

    fn respond_404(
        &self,
        request: &mut Request<'_>,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), RespondError> {
        if request.path().starts_with("/custom/") {
            response.write_all(b"custom not found")?;
        }
        Ok(())
    }

    fn accepts_websocket(&self, request: &Request<'_>) -> bool {
        request.path() == "/ws"
    }

    fn serve_websocket(&self, _request: &Request<'_>, mut socket: WebSocket) -> Result<(), RespondError> {
        let sender = socket.sender();
        while let Some(message) = socket.read_message()? {
            sender.send(message)?;
        }
        Ok(())
    }
}

fn test_config() -> ServerConfig {
    ServerConfig::new()
        .with_first_request_timeout_secs(5)
        .with_keep_alive_timeout_secs(5)
        .with_keep_alive_grace_secs(0)
        .with_read_timeout_secs(5)
}

fn spawn(server: Server) -> (ServerHandle, SocketAddr) {
    let _ = env_logger::builder().is_test(true).try_init();
    let handle = server.handle();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        tx.send(()).expect("signal start");
        let _ = server.serve_on(listener);
    });
    rx.recv().expect("server thread started");
    (handle, addr)
}

fn spawn_app(config: ServerConfig) -> (ServerHandle, SocketAddr) {
    spawn(Server::new(config, App))
}

struct Response {
    status: u16,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("read timeout");
        let reader = BufReader::new(stream.try_clone().expect("clone"));
        Self { stream, reader }
    }

    fn send(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).expect("write request");
    }

    fn get(&mut self, target: &str) -> Response {
        self.send(format!("GET {target} HTTP/1.1\r\nHost: test.local\r\n\r\n").as_bytes());
        self.response()
    }

    fn status_line(&mut self) -> String {
        read_line(&mut self.reader, 8192)
            .expect("status line")
            .expect("connection open")
    }

    fn response(&mut self) -> Response {
        self.read_response(false)
    }

    fn read_response(&mut self, head: bool) -> Response {
        let line = self.status_line();
        let status = line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status code");
        let headers = read_headers(&mut self.reader, 64 * 1024).expect("headers");
        let mut body = Vec::new();
        if head || status == 204 || status == 304 {
            // no body
        } else if headers
            .get("Transfer-Encoding")
            .is_some_and(|te| te.eq_ignore_ascii_case("chunked"))
        {
            ChunkedReader::new(&mut self.reader, 0)
                .read_to_end(&mut body)
                .expect("chunked body");
        } else if let Some(length) = headers.get("Content-Length") {
            let length = length.parse().expect("content length");
            LengthReader::new(&mut self.reader, length)
                .read_to_end(&mut body)
                .expect("fixed body");
        } else {
            self.reader.read_to_end(&mut body).expect("close-delimited body");
        }
        Response {
            status,
            headers,
            body,
        }
    }

    fn rest(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest).expect("read to close");
        rest
    }

    fn is_closed(&mut self) -> bool {
        matches!(self.reader.fill_buf(), Ok([]))
    }
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[test]
fn keep_alive_serves_sequential_requests() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);

    for _ in 0..3 {
        let response = client.get("/echo-path");
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "/echo-path");
        assert_eq!(response.header("Connection"), Some("keep-alive"));
        assert_eq!(response.header("Keep-Alive"), Some("timeout=5"));
        assert_eq!(response.header("Server"), Some("hearth"));
        assert!(response.header("Date").is_some());
    }

    client.send(b"GET /echo-path HTTP/1.1\r\nConnection: close\r\n\r\n");
    let response = client.response();
    assert_eq!(response.header("Connection"), Some("close"));
    assert!(client.is_closed());
}

#[test]
fn pipelined_requests_are_answered_in_order() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"GET /query?name=one HTTP/1.1\r\n\r\nGET /query?name=two HTTP/1.1\r\n\r\n");
    assert_eq!(client.response().text(), "one");
    assert_eq!(client.response().text(), "two");
}

#[test]
fn http10_closes_by_default() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"GET /echo-path HTTP/1.0\r\n\r\n");
    let response = client.response();
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Connection"), Some("close"));
    assert!(client.is_closed());
}

#[test]
fn idle_connections_time_out() {
    let config = test_config().with_keep_alive_timeout_secs(1);
    let (_handle, addr) = spawn_app(config);
    let mut client = Client::connect(addr);
    assert_eq!(client.get("/echo-path").status, 200);
    assert!(client.is_closed());
}

#[test]
fn leading_blank_lines_are_skipped() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"\r\n\r\nGET /echo-path HTTP/1.1\r\n\r\n");
    assert_eq!(client.response().text(), "/echo-path");
}

// ============================================================================
// Request-level errors
// ============================================================================

#[test]
fn oversized_request_line_is_414() {
    let config = test_config().with_request_uri_size_limit(64);
    let (_handle, addr) = spawn_app(config);
    let mut client = Client::connect(addr);
    let target = "/".repeat(200);
    client.send(format!("GET {target} HTTP/1.1\r\n\r\n").as_bytes());
    let response = client.response();
    assert_eq!(response.status, 414);
    assert!(response.text().contains("414 Request URI Too Long"));
    assert!(client.is_closed());
}

#[test]
fn oversized_headers_are_413() {
    let config = test_config().with_header_size_limit(128);
    let (_handle, addr) = spawn_app(config);
    let mut client = Client::connect(addr);
    let value = "x".repeat(500);
    client.send(format!("GET / HTTP/1.1\r\nX-Big: {value}\r\n\r\n").as_bytes());
    assert_eq!(client.response().status, 413);
    assert!(client.is_closed());
}

#[test]
fn malformed_request_line_gets_plain_diagnostic() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"hello there\r\n\r\n");
    let rest = String::from_utf8(client.rest()).expect("utf-8");
    assert!(rest.starts_with("Please send a full HTTP request."));
}

#[test]
fn unknown_method_is_501() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"BREW /pot HTTP/1.1\r\n\r\n");
    assert_eq!(client.response().status, 501);
}

#[test]
fn path_without_leading_slash_is_400() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"GET example.com HTTP/1.1\r\n\r\n");
    assert_eq!(client.response().status, 400);
}

// ============================================================================
// Request data
// ============================================================================

#[test]
fn query_and_cookies_are_decoded() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    assert_eq!(client.get("/query?name=J%C3%BCrgen+K").text(), "Jürgen K");

    client.send(b"GET /cookie HTTP/1.1\r\nCookie: theme=dark; session=abc123\r\n\r\n");
    assert_eq!(client.response().text(), "abc123");
}

#[test]
fn forwarded_headers_from_loopback_are_honoured() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(
        b"GET /client HTTP/1.1\r\nHost: internal:8080\r\nX-Forwarded-For: 203.0.113.7\r\nX-Forwarded-Host: public.example\r\n\r\n",
    );
    assert_eq!(client.response().text(), "203.0.113.7 public.example");

    client.send(b"GET /client HTTP/1.1\r\nHost: internal:8080\r\n\r\n");
    assert_eq!(client.response().text(), "127.0.0.1 internal:8080");
}

#[test]
fn chunked_request_body_is_streamed_to_the_responder() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(
        b"POST /body HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6; ext=1\r\n world\r\n0\r\n\r\n",
    );
    let response = client.response();
    assert_eq!(response.text(), "hello world");
    assert_eq!(response.header("Content-Length"), Some("11"));

    // The connection is still in sync.
    assert_eq!(client.get("/echo-path").text(), "/echo-path");
}

#[test]
fn unread_bodies_are_drained_before_reuse() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"POST /ignore-body HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789");
    assert_eq!(client.response().text(), "ignored");
    assert_eq!(client.get("/echo-path").text(), "/echo-path");
}

#[test]
fn oversized_unread_bodies_close_the_connection() {
    let config = test_config().with_drain_limit(4);
    let (_handle, addr) = spawn_app(config);
    let mut client = Client::connect(addr);
    client.send(b"POST /ignore-body HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789");
    assert_eq!(client.response().text(), "ignored");
    assert!(client.is_closed());
}

#[test]
fn urlencoded_forms_are_decoded() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(
        b"POST /form HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 15\r\n\r\na=one+two&b=%21",
    );
    assert_eq!(client.response().text(), "one two,!");
}

#[test]
fn forms_over_the_post_limit_are_413() {
    let config = test_config().with_post_limit(8);
    let (_handle, addr) = spawn_app(config);
    let mut client = Client::connect(addr);
    client.send(
        b"POST /form HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 15\r\n\r\na=one+two&b=%21",
    );
    assert_eq!(client.response().status, 413);
}

#[test]
fn expect_continue_is_honoured() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(
        b"POST /form HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\nExpect: 100-continue\r\n\r\n",
    );
    assert_eq!(client.status_line(), "HTTP/1.1 100 Continue");
    assert_eq!(client.status_line(), "");
    client.send(b"a=1&b=2");
    assert_eq!(client.response().text(), "1,2");
}

#[test]
fn expect_continue_over_limit_is_rejected_before_the_body() {
    let config = test_config().with_post_limit(16);
    let (_handle, addr) = spawn_app(config);
    let mut client = Client::connect(addr);
    client.send(
        b"POST /form HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 100\r\nExpect: 100-continue\r\n\r\n",
    );
    assert_eq!(client.response().status, 413);
}

#[test]
fn multipart_fields_and_uploads_reach_the_responder() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    let body = "--XyZ\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\r\n\
        Holiday\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        line one\nline two\r\n\
        --XyZ--\r\n";
    client.send(
        format!(
            "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .as_bytes(),
    );
    let response = client.response();
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "Holiday:notes.txt:line one\nline two");
}

// ============================================================================
// Responses
// ============================================================================

#[test]
fn single_ranges_get_206() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"GET /range HTTP/1.1\r\nRange: bytes=10-19\r\n\r\n");
    let response = client.response();
    assert_eq!(response.status, 206);
    assert_eq!(response.header("Content-Range"), Some("bytes 10-19/100"));
    assert_eq!(response.body, (10..20u8).collect::<Vec<_>>());

    let full = client.get("/range");
    assert_eq!(full.status, 200);
    assert_eq!(full.header("Accept-Ranges"), Some("bytes"));
    assert_eq!(full.body.len(), 100);
}

#[test]
fn matching_etag_gets_304() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    let etag = client
        .get("/range")
        .header("ETag")
        .expect("etag")
        .to_string();
    client.send(format!("GET /range HTTP/1.1\r\nIf-None-Match: {etag}\r\n\r\n").as_bytes());
    let response = client.response();
    assert_eq!(response.status, 304);
    assert!(response.body.is_empty());
    assert_eq!(client.get("/echo-path").text(), "/echo-path");
}

#[test]
fn head_requests_get_headers_only() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"HEAD /range HTTP/1.1\r\n\r\n");
    let response = client.read_response(true);
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Length"), Some("100"));
    assert_eq!(client.get("/echo-path").text(), "/echo-path");
}

#[test]
fn underfilled_fixed_length_body_is_padded() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    let response = client.get("/fixed");
    assert_eq!(response.body, b"short\0\0\0\0\0");
    assert_eq!(client.get("/echo-path").text(), "/echo-path");
}

#[test]
fn no_content_responses_carry_no_body() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    let response = client.get("/empty");
    assert_eq!(response.status, 204);
    assert!(response.header("Transfer-Encoding").is_none());
    assert_eq!(client.get("/echo-path").text(), "/echo-path");
}

#[test]
fn bare_redirects_get_a_link_page() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    let response = client.get("/redirect");
    assert_eq!(response.status, 302);
    assert_eq!(response.header("Location"), Some("/next?a=1&b=2"));
    assert!(response.text().contains("href=\"/next?a=1&amp;b=2\""));
}

// ============================================================================
// Fallbacks and failures
// ============================================================================

#[test]
fn responder_404_hook_runs_first() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    let response = client.get("/custom/missing");
    assert_eq!(response.status, 404);
    assert_eq!(response.text(), "custom not found");
}

#[test]
fn server_404_handler_is_the_second_fallback() {
    let server = Server::new(test_config(), App).with_not_found(|request, response| {
        let line = format!("nothing at {}", request.path());
        response.write_all(line.as_bytes())?;
        Ok(())
    });
    let (_handle, addr) = spawn(server);
    let mut client = Client::connect(addr);
    let response = client.get("/nowhere");
    assert_eq!(response.status, 404);
    assert_eq!(response.text(), "nothing at /nowhere");
}

#[test]
fn missing_404_response_is_500() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    let response = client.get("/nowhere");
    assert_eq!(response.status, 500);
    assert!(response.text().contains("failed to produce a 404"));
    // Declining is not a failure; the connection stays usable.
    assert_eq!(client.get("/echo-path").text(), "/echo-path");
}

#[test]
fn responder_errors_become_500_and_close() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    let response = client.get("/fail");
    assert_eq!(response.status, 500);
    assert!(response.text().contains("database on fire"));
    assert!(client.is_closed());
}

#[test]
fn responder_panics_become_500() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    let response = client.get("/panic");
    assert_eq!(response.status, 500);
    assert!(response.text().contains("responder exploded"));
}

#[test]
fn late_failures_truncate_the_response() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(b"GET /fail-late HTTP/1.1\r\n\r\n");
    let line = client.status_line();
    assert!(line.starts_with("HTTP/1.1 200"));
    let _headers = read_headers(&mut client.reader, 64 * 1024).expect("headers");
    let rest = String::from_utf8_lossy(&client.rest()).into_owned();
    assert!(rest.contains("partial"));
    assert!(!rest.contains("500"));
}

#[test]
fn body_deadline_closes_without_a_response() {
    let (_handle, addr) = spawn_app(test_config().with_read_timeout_secs(1));
    let mut client = Client::connect(addr);
    client.send(b"POST /body HTTP/1.1\r\nHost: test.local\r\nContent-Length: 10\r\n\r\nabc");
    assert!(client.rest().is_empty());
}

// ============================================================================
// Websockets
// ============================================================================

#[test]
fn websocket_upgrade_and_echo() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(
        b"GET /ws HTTP/1.1\r\nHost: test.local\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Protocol: chat, superchat\r\n\r\n",
    );
    assert_eq!(client.status_line(), "HTTP/1.1 101 Switching Protocols");
    let headers = read_headers(&mut client.reader, 64 * 1024).expect("handshake headers");
    assert_eq!(
        headers.get("Sec-WebSocket-Accept"),
        Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    );
    assert_eq!(headers.get("Sec-WebSocket-Protocol"), Some("chat"));

    Frame::new(OpCode::Text, "hello")
        .masked([1, 2, 3, 4])
        .write_to(&mut client.stream)
        .expect("send text");
    let echo = read_frame(&mut client.reader, 1 << 20)
        .expect("read echo")
        .expect("echo frame");
    assert_eq!(echo.opcode, OpCode::Text);
    assert_eq!(echo.payload, b"hello");
    assert!(echo.mask.is_none());

    Frame::new(OpCode::Ping, "are you there")
        .masked([9, 8, 7, 6])
        .write_to(&mut client.stream)
        .expect("send ping");
    let pong = read_frame(&mut client.reader, 125)
        .expect("read pong")
        .expect("pong frame");
    assert_eq!(pong.opcode, OpCode::Pong);
    assert_eq!(pong.payload, b"are you there");

    Frame::new(OpCode::Close, 1000u16.to_be_bytes().to_vec())
        .masked([5, 5, 5, 5])
        .write_to(&mut client.stream)
        .expect("send close");
    let close = read_frame(&mut client.reader, 125)
        .expect("read close")
        .expect("close frame");
    assert_eq!(close.opcode, OpCode::Close);
    assert_eq!(close.payload[..2], 1000u16.to_be_bytes());
}

#[test]
fn websocket_requests_on_other_paths_are_plain_requests() {
    let (_handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    client.send(
        b"GET /echo-path HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
    );
    let response = client.response();
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "/echo-path");
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn draining_closes_kept_alive_connections() {
    let (handle, addr) = spawn_app(test_config());
    let mut client = Client::connect(addr);
    assert_eq!(client.get("/echo-path").status, 200);
    assert_eq!(handle.active_connections(), 1);

    handle.start_drain();
    client.send(b"GET /echo-path HTTP/1.1\r\n\r\n");
    let response = client.response();
    assert_eq!(response.status, 200);
    assert!(client.is_closed());
}
