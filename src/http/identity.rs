//! Client address resolution.
//!
//! Picks the first usable address from the connection info and a fixed list of
//! proxy headers, normalized so the same client always maps to the same key.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Bucket used when no source yields a valid address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Candidates longer than this are rejected before inspection.
const MAX_CANDIDATE_LEN: usize = 64;
/// Longest textual IPv6 address accepted.
const MAX_IPV6_LEN: usize = 45;

/// Header sources, highest priority first. `true` marks list-valued headers,
/// where only the first element (the originating client) is used.
const HEADER_SOURCES: [(&str, bool); 4] = [
    ("cf-connecting-ip", false),
    ("x-real-ip", false),
    ("x-vercel-forwarded-for", true),
    ("x-forwarded-for", true),
];

/// Resolve the client address for a request.
///
/// The connection address wins when present, then the headers in
/// [`HEADER_SOURCES`] order. Falls back to [`UNKNOWN_CLIENT`].
pub fn resolve_client_address(headers: &HeaderMap, connect: Option<SocketAddr>) -> String {
    if let Some(address) = connect.and_then(|addr| normalize_address(&addr.ip().to_canonical().to_string())) {
        return address;
    }

    HEADER_SOURCES
        .iter()
        .filter_map(|(name, list_valued)| {
            let value = headers.get(*name)?.to_str().ok()?;
            let candidate = if *list_valued {
                value.split(',').next()?
            } else {
                value
            };
            normalize_address(candidate)
        })
        .next()
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Normalize one candidate address.
///
/// Accepts dotted-quad IPv4 (an optional `:port` is dropped) and hex-and-colon
/// IPv6 (a `%zone` suffix is dropped, the result is lower-cased). Surrounding
/// whitespace and brackets are ignored. Anything else yields `None`.
pub fn normalize_address(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix('[').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(']').unwrap_or(trimmed);

    if trimmed.is_empty() || trimmed.len() > MAX_CANDIDATE_LEN {
        return None;
    }

    if let Some(host) = dotted_quad_host(trimmed) {
        return is_valid_ipv4(host).then(|| host.to_string());
    }

    let without_zone = trimmed.split('%').next().unwrap_or(trimmed);
    let looks_like_ipv6 = without_zone.len() <= MAX_IPV6_LEN
        && without_zone.contains(':')
        && without_zone.chars().all(|c| c.is_ascii_hexdigit() || c == ':');

    looks_like_ipv6.then(|| without_zone.to_ascii_lowercase())
}

/// If `value` has the shape `d.d.d.d` or `d.d.d.d:port`, return the host part.
fn dotted_quad_host(value: &str) -> Option<&str> {
    let (host, port) = match value.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (value, None),
    };

    if let Some(port) = port {
        if port.is_empty() || port.len() > 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }

    let groups: Vec<&str> = host.split('.').collect();
    let shaped = groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()));

    shaped.then_some(host)
}

fn is_valid_ipv4(host: &str) -> bool {
    let groups: Vec<&str> = host.split('.').collect();
    groups.len() == 4
        && groups.iter().all(|g| {
            (1..=3).contains(&g.len())
                && g.bytes().all(|b| b.is_ascii_digit())
                && g.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
        })
}
