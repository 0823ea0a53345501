//! TCP accept loop with one thread per connection.
//!
//! ```no_run
//! use hearth_http::{from_fn, Server, ServerConfig};
//! use std::io::Write;
//!
//! let server = Server::new(
//!     ServerConfig::new().with_bind_addr("127.0.0.1:8080"),
//!     from_fn(|request, response| {
//!         response.set_header("Content-Type", "text/plain")?;
//!         write!(response, "hello from {}", request.path())?;
//!         Ok(())
//!     }),
//! );
//! server.serve().unwrap();
//! ```

use crate::config::ServerConfig;
use crate::connection;
use crate::pages;
use crate::responder::{NotFoundHandler, RespondError, Responder};
use crate::response::ResponseWriter;
use crate::status::status_line;
use crate::trust::{ProxyTrust, TrustedProxies};
use hearth_core::Request;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Error from running a server.
#[derive(Debug)]
pub enum ServerError {
    /// Binding failed or accepting hit an unrecoverable error.
    Io(io::Error),
    /// The server was drained before it started accepting.
    Shutdown,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "server I/O error: {e}"),
            Self::Shutdown => write!(f, "server is shutting down"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Shutdown => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// State every connection thread reads.
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) responder: Arc<dyn Responder>,
    pub(crate) not_found: Option<Arc<NotFoundHandler>>,
    pub(crate) trust: Arc<dyn ProxyTrust>,
    pub(crate) draining: Arc<AtomicBool>,
}

impl Shared {
    pub(crate) fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}

/// A handle for draining a running server from another thread.
#[derive(Debug, Clone, Default)]
pub struct ServerHandle {
    draining: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
}

impl ServerHandle {
    /// Stop accepting connections. Open connections are closed once their
    /// current exchange completes.
    pub fn start_drain(&self) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("drain started");
        // Wake a blocked accept.
        if let Some(addr) = *self.local_addr.lock() {
            let _ = TcpStream::connect_timeout(&addr, Duration::from_secs(1));
        }
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Connections currently being served.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// The bound address once the server is listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An HTTP/1.1 server.
pub struct Server {
    config: ServerConfig,
    responder: Arc<dyn Responder>,
    not_found: Option<Arc<NotFoundHandler>>,
    trust: Option<Arc<dyn ProxyTrust>>,
    handle: ServerHandle,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// A server answering every request with `responder`.
    pub fn new(config: ServerConfig, responder: impl Responder + 'static) -> Self {
        Self::with_shared_responder(config, Arc::new(responder))
    }

    /// Like [`new`](Self::new) for a responder that is shared elsewhere.
    #[must_use]
    pub fn with_shared_responder(config: ServerConfig, responder: Arc<dyn Responder>) -> Self {
        Self {
            config,
            responder,
            not_found: None,
            trust: None,
            handle: ServerHandle::default(),
        }
    }

    /// Fallback for requests the responder and its 404 hook left unanswered.
    #[must_use]
    pub fn with_not_found<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Request<'_>, &mut ResponseWriter<'_>) -> Result<(), RespondError>
            + Send
            + Sync
            + 'static,
    {
        let handler: Arc<NotFoundHandler> = Arc::new(handler);
        self.not_found = Some(handler);
        self
    }

    /// Decide which peers may supply forwarded-address headers. Replaces
    /// the configured `trusted_proxies` list.
    #[must_use]
    pub fn with_proxy_trust(mut self, trust: Arc<dyn ProxyTrust>) -> Self {
        self.trust = Some(trust);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// A handle for draining the server once it runs.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Bind the configured address and serve until drained.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or accepting fails unrecoverably.
    pub fn serve(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr())?;
        self.serve_on(listener)
    }

    /// Serve connections from an already bound listener until drained.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Shutdown`] if the server was drained before
    /// it started, or an I/O error if accepting fails unrecoverably.
    pub fn serve_on(self, listener: TcpListener) -> Result<(), ServerError> {
        let Self {
            config,
            responder,
            not_found,
            trust,
            handle,
        } = self;
        if handle.is_draining() {
            return Err(ServerError::Shutdown);
        }
        let local_addr = listener.local_addr()?;
        *handle.local_addr.lock() = Some(local_addr);
        info!("listening on {local_addr}");

        let trust: Arc<dyn ProxyTrust> = match trust {
            Some(trust) => trust,
            None => Arc::new(config.trusted_proxies().iter().copied().collect::<TrustedProxies>()),
        };
        let shared = Arc::new(Shared {
            config,
            responder,
            not_found,
            trust,
            draining: Arc::clone(&handle.draining),
        });

        for incoming in listener.incoming() {
            if handle.is_draining() {
                break;
            }
            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) if is_fatal_accept_error(&e) => {
                    error!("accept failed: {e}");
                    return Err(ServerError::Io(e));
                }
                Err(e) => {
                    debug!("accept failed, retrying: {e}");
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };
            accept(stream, &shared, &handle);
        }
        info!("stopped accepting on {local_addr}");
        Ok(())
    }
}

fn accept(stream: TcpStream, shared: &Arc<Shared>, handle: &ServerHandle) {
    let max = shared.config.max_connections();
    let active = handle.active.fetch_add(1, Ordering::AcqRel) + 1;
    let guard = ActiveGuard(Arc::clone(&handle.active));
    if max > 0 && active > max {
        warn!("connection limit of {max} reached, rejecting {:?}", stream.peer_addr().ok());
        reject_busy(stream, &shared.config);
        drop(guard);
        return;
    }
    if let Err(e) = stream.set_nodelay(shared.config.tcp_nodelay()) {
        debug!("set_nodelay failed: {e}");
    }

    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("hearth-conn-{id}"))
        .spawn(move || {
            let _guard = guard;
            connection::serve_connection(stream, id, &shared);
        });
    if let Err(e) = spawned {
        warn!("could not spawn thread for connection {id}: {e}");
    }
}

fn reject_busy(mut stream: TcpStream, config: &ServerConfig) {
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let html = pages::error_page(
        &status_line(503),
        "The server is handling too many connections. Please try again later.",
        &pages::signature(config.server_name(), None),
    );
    let mut response = ResponseWriter::new(&mut stream, config.server_name());
    let sent = response
        .set_status_code(503)
        .and_then(|()| response.send_body(html.as_bytes()))
        .and_then(|()| response.finish());
    if let Err(e) = sent {
        debug!("503 response failed: {e}");
    }
    let _ = stream.shutdown(Shutdown::Both);
}

/// Whether an accept error means the listener itself is broken.
///
/// Per-connection failures and resource exhaustion are retried.
#[must_use]
pub fn is_fatal_accept_error(e: &io::Error) -> bool {
    // EMFILE, ENFILE, ENOBUFS, ENOMEM
    if matches!(e.raw_os_error(), Some(12 | 23 | 24 | 105)) {
        return false;
    }
    !matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
