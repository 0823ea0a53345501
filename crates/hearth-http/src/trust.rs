//! Trusted-proxy handling for `X-Forwarded-For`, `CF-Connecting-IP` and
//! `X-Forwarded-Host`.
//!
//! Forwarded headers are only believed when the TCP peer is loopback or a
//! trusted proxy. The client address is the rightmost `X-Forwarded-For` hop
//! that is not itself a trusted proxy. `CF-Connecting-IP` names the client
//! directly and takes precedence, but only from a trusted proxy: a loopback
//! peer is not enough for it.

use hearth_core::Headers;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

/// Decides whether a peer may supply forwarded-address headers.
///
/// Implemented for closures:
///
/// ```
/// use hearth_http::ProxyTrust;
/// use std::net::IpAddr;
///
/// let private_only = |ip: IpAddr| match ip {
///     IpAddr::V4(v4) => v4.is_private(),
///     IpAddr::V6(_) => false,
/// };
/// assert!(private_only.is_trusted("10.0.0.1".parse().unwrap()));
/// ```
pub trait ProxyTrust: Send + Sync {
    fn is_trusted(&self, ip: IpAddr) -> bool;
}

impl<F> ProxyTrust for F
where
    F: Fn(IpAddr) -> bool + Send + Sync,
{
    fn is_trusted(&self, ip: IpAddr) -> bool {
        self(ip)
    }
}

/// A set of trusted proxy addresses that can change while the server runs.
#[derive(Debug, Default)]
pub struct TrustedProxies {
    ips: RwLock<HashSet<IpAddr>>,
}

impl TrustedProxies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `ip`. Returns false if it was already trusted.
    pub fn insert(&self, ip: IpAddr) -> bool {
        self.ips.write().insert(ip)
    }

    /// Stop trusting `ip`. Returns false if it was not trusted.
    pub fn remove(&self, ip: IpAddr) -> bool {
        self.ips.write().remove(&ip)
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ips.read().contains(&ip)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ips.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ips.read().is_empty()
    }
}

impl FromIterator<IpAddr> for TrustedProxies {
    fn from_iter<I: IntoIterator<Item = IpAddr>>(iter: I) -> Self {
        Self {
            ips: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl ProxyTrust for TrustedProxies {
    fn is_trusted(&self, ip: IpAddr) -> bool {
        self.contains(ip)
    }
}

fn peer_may_forward(peer: IpAddr, trust: &dyn ProxyTrust) -> bool {
    peer.is_loopback() || trust.is_trusted(peer)
}

fn parse_hop(hop: &str) -> Option<IpAddr> {
    let hop = hop.trim();
    hop.parse::<IpAddr>()
        .ok()
        .or_else(|| hop.parse::<SocketAddr>().ok().map(|s| s.ip()))
}

/// The effective client address for a request from `peer`.
#[must_use]
pub fn client_addr(peer: IpAddr, headers: &Headers, trust: &dyn ProxyTrust) -> IpAddr {
    if !peer_may_forward(peer, trust) {
        return peer;
    }
    if trust.is_trusted(peer) {
        if let Some(connecting) = headers.get("CF-Connecting-IP").and_then(parse_hop) {
            return connecting;
        }
    }
    let hops: Vec<IpAddr> = headers
        .get_all("X-Forwarded-For")
        .iter()
        .flat_map(|value| value.split(','))
        .filter_map(parse_hop)
        .collect();
    hops.into_iter()
        .rev()
        .find(|ip| !trust.is_trusted(*ip))
        .unwrap_or(peer)
}

/// Whether a permitted peer reports the original request as `https` via
/// `X-Forwarded-Proto`.
#[must_use]
pub fn forwarded_https(peer: IpAddr, headers: &Headers, trust: &dyn ProxyTrust) -> bool {
    peer_may_forward(peer, trust)
        && headers
            .get("X-Forwarded-Proto")
            .and_then(|v| v.split(',').next())
            .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

/// The effective host: `X-Forwarded-Host` from a permitted peer, else `Host`.
#[must_use]
pub fn effective_host(peer: IpAddr, headers: &Headers, trust: &dyn ProxyTrust) -> Option<String> {
    let forwarded = headers
        .get("X-Forwarded-Host")
        .filter(|_| peer_may_forward(peer, trust))
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    forwarded
        .or_else(|| headers.get("Host"))
        .map(ToString::to_string)
}
