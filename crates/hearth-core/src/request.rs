//! HTTP request types.

use crate::headers::Headers;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use tempfile::TempPath;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// Parse a method token. Methods are case-sensitive.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"GET" => Some(Self::Get),
            b"HEAD" => Some(Self::Head),
            b"POST" => Some(Self::Post),
            b"PUT" => Some(Self::Put),
            b"DELETE" => Some(Self::Delete),
            b"CONNECT" => Some(Self::Connect),
            b"OPTIONS" => Some(Self::Options),
            b"TRACE" => Some(Self::Trace),
            b"PATCH" => Some(Self::Patch),
            _ => None,
        }
    }

    /// The canonical method token.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body.
///
/// Streams borrow the connection, so a body is only readable while the
/// request/response cycle that produced it is running.
pub enum Body<'a> {
    /// No body, or the body was already consumed by form decoding.
    Empty,
    /// A framed body stream that reports end-of-data at the message boundary.
    Stream(Box<dyn Read + 'a>),
}

impl Body<'_> {
    /// Check if there is no body stream.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Read the remaining body into memory, failing once `limit` bytes are exceeded.
    pub fn read_to_vec(&mut self, limit: u64) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let read = self.take(limit.saturating_add(1)).read_to_end(&mut out)?;
        if read as u64 > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request body exceeds {limit} bytes"),
            ));
        }
        Ok(out)
    }
}

impl Read for Body<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Empty => Ok(0),
            Self::Stream(stream) => stream.read(buf),
        }
    }
}

impl fmt::Debug for Body<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

/// A file received through `multipart/form-data`, spooled to a temporary file.
///
/// The temporary file is removed when the value is dropped unless it was
/// [persisted](UploadedFile::persist).
#[derive(Debug)]
pub struct UploadedFile {
    field_name: String,
    filename: String,
    content_type: String,
    len: u64,
    path: TempPath,
}

impl UploadedFile {
    /// Wrap a spooled temporary file.
    #[must_use]
    pub fn new(
        field_name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        len: u64,
        path: TempPath,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            len,
            path,
        }
    }

    /// The form field the file was sent under.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// The filename supplied by the client.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The part's declared content type.
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Size of the spooled data in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the upload carried no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Location of the spooled data.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the spooled data for reading.
    pub fn open(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    /// Read the whole upload into memory.
    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    /// Move the upload to `dest`, keeping it past the end of the request.
    pub fn persist(self, dest: impl AsRef<Path>) -> io::Result<()> {
        self.path.persist(dest).map_err(|e| e.error)
    }

    /// Delete the spooled file now, reporting failures.
    pub fn delete(self) -> io::Result<()> {
        self.path.close()
    }
}

/// HTTP request.
///
/// Built once per request/response cycle by the connection handler; only the
/// body stream and the upload list change afterwards.
#[derive(Debug)]
pub struct Request<'a> {
    method: Method,
    target: String,
    path: String,
    query: Option<String>,
    params: Vec<(String, String)>,
    version: String,
    headers: Headers,
    cookies: Vec<(String, String)>,
    form: Vec<(String, String)>,
    uploads: Vec<UploadedFile>,
    host: Option<String>,
    secure: bool,
    client_addr: IpAddr,
    peer_addr: SocketAddr,
    body: Body<'a>,
}

impl<'a> Request<'a> {
    /// Create a new request for `target` (path plus optional query).
    ///
    /// The path is taken verbatim; the connection handler replaces it with
    /// the percent-decoded form.
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        let target = target.into();
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.clone(), None),
        };
        let unspecified = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        Self {
            method,
            target,
            path,
            query,
            params: Vec::new(),
            version: "HTTP/1.1".to_string(),
            headers: Headers::new(),
            cookies: Vec::new(),
            form: Vec::new(),
            uploads: Vec::new(),
            host: None,
            secure: false,
            client_addr: unspecified.ip(),
            peer_addr: unspecified,
            body: Body::Empty,
        }
    }

    /// Get the HTTP method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns true for `HEAD` requests.
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.method == Method::Head
    }

    /// The raw request-target as sent, including any query string.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The percent-decoded request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Set the decoded path.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// The raw query string, without the leading `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The first decoded query parameter named `name`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        lookup(&self.params, name)
    }

    /// All decoded query parameters in order.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Set the decoded query parameters.
    pub fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    /// The protocol version token, e.g. `HTTP/1.1`.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Set the protocol version token.
    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    /// Get the headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get mutable headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Shorthand for the first value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The first cookie named `name`.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        lookup(&self.cookies, name)
    }

    /// All cookies in the order they were sent.
    #[must_use]
    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// Set the decoded cookies.
    pub fn set_cookies(&mut self, cookies: Vec<(String, String)>) {
        self.cookies = cookies;
    }

    /// The first form field named `name`, from a URL-encoded or multipart body.
    #[must_use]
    pub fn form_value(&self, name: &str) -> Option<&str> {
        lookup(&self.form, name)
    }

    /// All decoded form fields.
    #[must_use]
    pub fn form(&self) -> &[(String, String)] {
        &self.form
    }

    /// Set the decoded form fields.
    pub fn set_form(&mut self, form: Vec<(String, String)>) {
        self.form = form;
    }

    /// The uploaded file sent under `field_name`.
    #[must_use]
    pub fn upload(&self, field_name: &str) -> Option<&UploadedFile> {
        self.uploads.iter().find(|u| u.field_name == field_name)
    }

    /// All uploaded files.
    #[must_use]
    pub fn uploads(&self) -> &[UploadedFile] {
        &self.uploads
    }

    /// Set the uploaded files.
    pub fn set_uploads(&mut self, uploads: Vec<UploadedFile>) {
        self.uploads = uploads;
    }

    /// Take ownership of the uploaded files, e.g. to persist or delete them.
    pub fn take_uploads(&mut self) -> Vec<UploadedFile> {
        std::mem::take(&mut self.uploads)
    }

    /// The effective host: `X-Forwarded-Host` from a trusted proxy, else `Host`.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Set the effective host.
    pub fn set_host(&mut self, host: Option<String>) {
        self.host = host;
    }

    /// Whether the client reached us over TLS, as reported by a trusted
    /// proxy's `X-Forwarded-Proto: https`.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Record whether the request arrived over TLS.
    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    /// The entity tag the client already holds: the first `If-None-Match`
    /// value with surrounding quotes removed.
    #[must_use]
    pub fn request_etag(&self) -> Option<&str> {
        let tag = self.headers.get("If-None-Match")?.trim();
        Some(
            tag.strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .unwrap_or(tag),
        )
    }

    /// The `User-Agent` header, if sent.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get("User-Agent")
    }

    /// The `Referer` header, if sent.
    #[must_use]
    pub fn referer(&self) -> Option<&str> {
        self.headers.get("Referer")
    }

    /// The client address after applying forwarded-address headers from trusted peers.
    #[must_use]
    pub fn client_addr(&self) -> IpAddr {
        self.client_addr
    }

    /// The address of the immediate TCP peer.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Record the peer and effective client address.
    pub fn set_addrs(&mut self, peer_addr: SocketAddr, client_addr: IpAddr) {
        self.peer_addr = peer_addr;
        self.client_addr = client_addr;
    }

    /// Get the body.
    pub fn body_mut(&mut self) -> &mut Body<'a> {
        &mut self.body
    }

    /// Take the body, replacing with Empty.
    pub fn take_body(&mut self) -> Body<'a> {
        std::mem::replace(&mut self.body, Body::Empty)
    }

    /// Set the body.
    pub fn set_body(&mut self, body: Body<'a>) {
        self.body = body;
    }
}

fn lookup<'v>(pairs: &'v [(String, String)], name: &str) -> Option<&'v str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}
