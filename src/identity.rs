//! Client identity resolution for rate limiting keys.
//!
//! The key is either an entry of the `X-Forwarded-For` chain, counted
//! `proxy_count` hops back from the nearest proxy, or the address of the
//! direct connection. Clients can prepend anything they like to the chain,
//! but only the trusted proxies append to its end, so the entry is always
//! picked from the end. A chain shorter than `proxy_count` clamps to its first
//! entry instead of failing.

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use std::net::SocketAddr;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Remote address used when the request carries no connection info.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the rate limit key of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientResolver {
    proxy_count: usize,
}

impl ClientResolver {
    pub fn new(proxy_count: usize) -> Self {
        Self { proxy_count }
    }

    pub fn proxy_count(&self) -> usize {
        self.proxy_count
    }

    /// Resolve the key from a forwarded-for header value and the remote address.
    ///
    /// Never fails: anything that cannot be used degrades to the connection
    /// address.
    pub fn resolve(&self, forwarded_for: Option<&str>, remote_addr: &str) -> String {
        if let Some(client) = self.from_forwarded(forwarded_for) {
            return client.to_string();
        }

        strip_port(remote_addr).to_string()
    }

    /// Resolve the key of an axum request.
    pub fn resolve_request(&self, request: &Request) -> String {
        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        let forwarded = forwarded_for(request.headers());
        self.resolve(forwarded.as_deref(), &remote_addr)
    }

    fn from_forwarded<'a>(&self, forwarded_for: Option<&'a str>) -> Option<&'a str> {
        if self.proxy_count == 0 {
            return None;
        }

        let header = forwarded_for.filter(|value| !value.trim().is_empty())?;
        let hops: Vec<&str> = header.split(',').collect();
        let index = hops.len().saturating_sub(self.proxy_count);

        Some(hops[index].trim()).filter(|hop| !hop.is_empty())
    }
}

/// Every `X-Forwarded-For` field line joined into one chain.
///
/// Repeated lines are one comma-separated list, in order; lines that are not
/// readable text are skipped.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let lines: Vec<&str> = headers
        .get_all(FORWARDED_FOR_HEADER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join(","))
    }
}

/// Strip a `:port` suffix, handling bracketed IPv6 literals.
///
/// Addresses without a port (bare IPv4, bare IPv6, host names) come back
/// unchanged.
pub fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) if tail.starts_with(':') => host,
            _ => addr,
        };
    }

    match addr.rsplit_once(':') {
        Some((host, _port)) if !host.contains(':') && !host.is_empty() => host,
        _ => addr,
    }
}
