//! Server configuration.
//!
//! ```
//! use hearth_http::ServerConfig;
//!
//! let config = ServerConfig::from_json(r#"{ "bind_addr": "0.0.0.0:80", "post_limit": 4096 }"#)
//!     .unwrap()
//!     .with_keep_alive_timeout_secs(5);
//! assert_eq!(config.bind_addr(), "0.0.0.0:80");
//! assert_eq!(config.post_limit(), 4096);
//! assert_eq!(config.header_size_limit(), 16384);
//! ```

use crate::multipart::MultipartLimits;
use hearth_core::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Limits, timeouts and identity of a server.
///
/// Size limits of 0 disable `post_limit`, `upload_limit` and
/// `max_connections`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    bind_addr: String,
    server_name: String,
    request_uri_size_limit: usize,
    header_size_limit: usize,
    post_limit: u64,
    upload_limit: u64,
    websocket_max_payload_length: usize,
    keep_alive_timeout_secs: u64,
    first_request_timeout_secs: u64,
    keep_alive_grace_secs: u64,
    read_timeout_secs: u64,
    drain_limit: u64,
    max_connections: usize,
    tcp_nodelay: bool,
    upload_dir: Option<PathBuf>,
    trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            server_name: "hearth".to_string(),
            request_uri_size_limit: 16 * 1024,
            header_size_limit: 16 * 1024,
            post_limit: 2 * 1024 * 1024,
            upload_limit: 2 * 1024 * 1024 * 1024,
            websocket_max_payload_length: 16 * 1024,
            keep_alive_timeout_secs: 15,
            first_request_timeout_secs: 60,
            keep_alive_grace_secs: 10,
            read_timeout_secs: 60,
            drain_limit: 64 * 1024,
            max_connections: 0,
            tcp_nodelay: true,
            upload_dir: None,
            trusted_proxies: Vec::new(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed documents or fields of
    /// the wrong type.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Name sent in the `Server` header and on generated pages.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Longest accepted request line.
    #[must_use]
    pub fn with_request_uri_size_limit(mut self, limit: usize) -> Self {
        self.request_uri_size_limit = limit;
        self
    }

    /// Largest accepted header block.
    #[must_use]
    pub fn with_header_size_limit(mut self, limit: usize) -> Self {
        self.header_size_limit = limit;
        self
    }

    /// Budget for URL-encoded bodies and multipart text fields.
    #[must_use]
    pub fn with_post_limit(mut self, limit: u64) -> Self {
        self.post_limit = limit;
        self
    }

    /// Largest accepted multipart body.
    #[must_use]
    pub fn with_upload_limit(mut self, limit: u64) -> Self {
        self.upload_limit = limit;
        self
    }

    #[must_use]
    pub fn with_websocket_max_payload_length(mut self, limit: usize) -> Self {
        self.websocket_max_payload_length = limit;
        self
    }

    /// Idle time advertised to clients between requests.
    #[must_use]
    pub fn with_keep_alive_timeout_secs(mut self, secs: u64) -> Self {
        self.keep_alive_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_first_request_timeout_secs(mut self, secs: u64) -> Self {
        self.first_request_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_keep_alive_grace_secs(mut self, secs: u64) -> Self {
        self.keep_alive_grace_secs = secs;
        self
    }

    /// Per-read deadline once a request has started.
    #[must_use]
    pub fn with_read_timeout_secs(mut self, secs: u64) -> Self {
        self.read_timeout_secs = secs;
        self
    }

    /// Unread request body drained before a connection is reused.
    #[must_use]
    pub fn with_drain_limit(mut self, limit: u64) -> Self {
        self.drain_limit = limit;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Directory for spooled uploads instead of the system temp dir.
    #[must_use]
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    /// Proxies allowed to supply `X-Forwarded-For` and `X-Forwarded-Host`.
    #[must_use]
    pub fn with_trusted_proxies(mut self, proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        self.trusted_proxies = proxies.into_iter().collect();
        self
    }

    #[must_use]
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    #[must_use]
    pub fn request_uri_size_limit(&self) -> usize {
        self.request_uri_size_limit
    }

    #[must_use]
    pub fn header_size_limit(&self) -> usize {
        self.header_size_limit
    }

    #[must_use]
    pub fn post_limit(&self) -> u64 {
        self.post_limit
    }

    #[must_use]
    pub fn upload_limit(&self) -> u64 {
        self.upload_limit
    }

    #[must_use]
    pub fn websocket_max_payload_length(&self) -> usize {
        self.websocket_max_payload_length
    }

    #[must_use]
    pub fn keep_alive_timeout_secs(&self) -> u64 {
        self.keep_alive_timeout_secs
    }

    /// How long to wait for the first request on a new connection.
    #[must_use]
    pub fn first_request_timeout(&self) -> Duration {
        Duration::from_secs(self.first_request_timeout_secs)
    }

    /// How long to wait for the next request on a kept-alive connection.
    #[must_use]
    pub fn next_request_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs + self.keep_alive_grace_secs)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    #[must_use]
    pub fn drain_limit(&self) -> u64 {
        self.drain_limit
    }

    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    #[must_use]
    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    #[must_use]
    pub fn upload_dir(&self) -> Option<&Path> {
        self.upload_dir.as_deref()
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    /// Limits for decoding `multipart/form-data` bodies.
    #[must_use]
    pub fn multipart_limits(&self) -> MultipartLimits {
        MultipartLimits {
            post_limit: self.post_limit,
            header_limit: self.header_size_limit,
            upload_dir: self.upload_dir.clone(),
        }
    }

    /// Settings for upgraded websocket connections.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_payload_length: self.websocket_max_payload_length,
            ..WebSocketConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.server_name(), "hearth");
        assert_eq!(config.post_limit(), 2_097_152);
        assert_eq!(config.upload_limit(), 2_147_483_648);
        assert_eq!(config.websocket_max_payload_length(), 16384);
        assert_eq!(config.first_request_timeout(), Duration::from_secs(60));
        assert_eq!(config.next_request_timeout(), Duration::from_secs(25));
        assert!(config.tcp_nodelay());
        assert!(config.trusted_proxies().is_empty());
    }

    #[test]
    fn json_overrides_and_defaults() {
        let config = ServerConfig::from_json(
            r#"{
                "server_name": "edge",
                "trusted_proxies": ["10.0.0.1", "::1"],
                "upload_dir": "/var/spool/uploads",
                "max_connections": 8
            }"#,
        )
        .unwrap();
        assert_eq!(config.server_name(), "edge");
        assert_eq!(config.trusted_proxies().len(), 2);
        assert_eq!(config.upload_dir(), Some(Path::new("/var/spool/uploads")));
        assert_eq!(config.max_connections(), 8);
        assert_eq!(config.keep_alive_timeout_secs(), 15);
    }

    #[test]
    fn json_type_errors_are_reported() {
        assert!(ServerConfig::from_json(r#"{ "post_limit": "lots" }"#).is_err());
    }

    #[test]
    fn derived_limits() {
        let config = ServerConfig::new()
            .with_post_limit(10)
            .with_header_size_limit(100)
            .with_websocket_max_payload_length(42);
        let limits = config.multipart_limits();
        assert_eq!(limits.post_limit, 10);
        assert_eq!(limits.header_limit, 100);
        assert_eq!(config.websocket_config().max_payload_length, 42);
    }
}
