//! Client identity resolution.
//!
//! The identity is the string every limiter, blocklist entry and attack
//! record is keyed on. It is derived from whichever request metadata is
//! available, most authoritative source first:
//!
//! 1. platform-reported peer address
//! 2. transport-layer remote address
//! 3. socket remote address
//! 4. first hop of `x-forwarded-for`, trimmed
//! 5. `x-real-ip`
//! 6. the literal [`UNKNOWN_IDENTITY`]
//!
//! Forwarded headers are trusted as-is when nothing better exists; the
//! service expects a trusted reverse proxy in front of it.

use std::net::IpAddr;

/// Identity used when no source yields a value.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Request metadata an identity can be derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySources {
    /// Address reported by the hosting platform.
    pub peer_addr: Option<String>,
    /// Remote address of the transport connection.
    pub remote_addr: Option<String>,
    /// Remote address of the raw socket.
    pub socket_addr: Option<String>,
    /// Raw `x-forwarded-for` header value.
    pub forwarded_for: Option<String>,
    /// Raw `x-real-ip` header value.
    pub real_ip: Option<String>,
}

impl IdentitySources {
    /// Create an empty set of sources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the platform-reported peer address.
    #[must_use]
    pub fn with_peer_addr(mut self, addr: impl Into<String>) -> Self {
        self.peer_addr = Some(addr.into());
        self
    }

    /// Set the transport remote address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Set the socket remote address.
    #[must_use]
    pub fn with_socket_addr(mut self, addr: impl Into<String>) -> Self {
        self.socket_addr = Some(addr.into());
        self
    }

    /// Set the `x-forwarded-for` header value.
    #[must_use]
    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    /// Set the `x-real-ip` header value.
    #[must_use]
    pub fn with_real_ip(mut self, value: impl Into<String>) -> Self {
        self.real_ip = Some(value.into());
        self
    }

    /// Resolve these sources to an identity.
    #[must_use]
    pub fn resolve(&self) -> String {
        resolve(self)
    }
}

/// Resolve request metadata to a client identity.
///
/// Never fails; falls back to [`UNKNOWN_IDENTITY`].
#[must_use]
pub fn resolve(sources: &IdentitySources) -> String {
    non_empty(sources.peer_addr.as_deref())
        .or_else(|| non_empty(sources.remote_addr.as_deref()))
        .or_else(|| non_empty(sources.socket_addr.as_deref()))
        .or_else(|| {
            sources
                .forwarded_for
                .as_deref()
                .and_then(first_forwarded_hop)
        })
        .or_else(|| non_empty(sources.real_ip.as_deref()))
        .unwrap_or(UNKNOWN_IDENTITY)
        .to_string()
}

/// Client-nearest entry of a comma-separated `x-forwarded-for` value.
#[must_use]
pub fn first_forwarded_hop(value: &str) -> Option<&str> {
    value.split(',').next().and_then(|hop| non_empty(Some(hop)))
}

/// Number of non-empty hops in an `x-forwarded-for` value.
#[must_use]
pub fn forwarded_hop_count(value: &str) -> usize {
    value.split(',').filter(|hop| !hop.trim().is_empty()).count()
}

/// Check whether an identity is a loopback address.
///
/// Covers `127.0.0.0/8`, `::1` and IPv4-mapped loopback such as
/// `::ffff:127.0.0.1`. Anything that does not parse is not loopback.
#[must_use]
pub fn is_loopback(identity: &str) -> bool {
    match identity.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
        Err(_) => false,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
