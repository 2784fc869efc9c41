//! `Host` header → routing key.

use crate::error::RouteError;

/// Strip the port and the `.{route_domain}` suffix from `host`.
///
/// `user1.myapp.localhost:8080` with domain `localhost` yields
/// `user1.myapp`. The suffix comparison is ASCII case-insensitive and a
/// single trailing root dot (`api.localhost.`) is tolerated.
pub fn routing_key<'a>(host: Option<&'a str>, route_domain: &str) -> Result<&'a str, RouteError> {
    let raw = host.map(str::trim).filter(|h| !h.is_empty()).ok_or(RouteError::MissingHost)?;
    if !raw.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(RouteError::MalformedHost {
            host: raw.to_string(),
        });
    }
    let hostname = strip_port(raw);
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);

    let outside = || RouteError::OutsideDomain {
        host: raw.to_string(),
        domain: route_domain.to_string(),
    };

    // key + '.' + domain, with a non-empty key
    let suffix_len = route_domain.len() + 1;
    if hostname.len() <= suffix_len {
        return Err(outside());
    }
    let split = hostname.len() - suffix_len;
    let (key, suffix) = match (hostname.get(..split), hostname.get(split..)) {
        (Some(key), Some(suffix)) => (key, suffix),
        _ => return Err(outside()),
    };
    if !suffix.starts_with('.') || !suffix[1..].eq_ignore_ascii_case(route_domain) {
        return Err(outside());
    }
    Ok(key)
}

/// Trailing-segment candidates of a routing key, most specific first:
/// `a.b.c` → `a.b.c`, `b.c`, `c`.
pub fn suffix_candidates(key: &str) -> impl Iterator<Item = &str> {
    std::iter::once(key).chain(key.match_indices('.').map(move |(idx, _)| &key[idx + 1..]))
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
