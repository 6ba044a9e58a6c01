//! Header hygiene: joined-value access, hop-by-hop stripping, stateful
//! header detection, quoted-string encoding.

use axum::http::{header, HeaderMap, HeaderName};

/// Response headers whose transport by signed exchange would leak
/// cross-origin state. Stripped before signing; optionally fatal to the
/// sign decision when the matched URL set says so.
pub const STATEFUL_RESPONSE_HEADERS: &[&str] = &[
    "authentication-control",
    "authentication-info",
    "clear-site-data",
    "optional-www-authenticate",
    "proxy-authenticate",
    "proxy-authentication-info",
    "public-key-pins",
    "sec-websocket-accept",
    "set-cookie",
    "set-cookie2",
    "setprofile",
    "strict-transport-security",
    "www-authenticate",
];

/// Headers a 304 response must carry through if the 200 would have had them
/// (RFC 7232 §4.1).
pub const STATUS_NOT_MODIFIED_HEADERS: &[&str] = &[
    "cache-control",
    "content-location",
    "date",
    "etag",
    "expires",
    "vary",
];

/// Conditional request headers forwarded to the upstream fetch.
pub const CONDITIONAL_REQUEST_HEADERS: &[&str] = &[
    "if-match",
    "if-none-match",
    "if-modified-since",
    "if-unmodified-since",
    "if-range",
];

/// Standard hop-by-hop headers (RFC 7230 §6.1); names listed in
/// `Connection` are stripped as well.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// All values of the named header joined on comma, except `Set-Cookie`,
/// which is not comma-combinable and yields only its first value.
///
/// Returns `None` when the header is absent or the joined value is empty.
pub fn get_joined(headers: &HeaderMap, name: &str) -> Option<String> {
    let mut values = headers.get_all(name).iter();
    let joined = if name.eq_ignore_ascii_case("set-cookie") {
        String::from_utf8_lossy(values.next()?.as_bytes()).into_owned()
    } else {
        values
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
            .collect::<Vec<_>>()
            .join(", ")
    };
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Strip hop-by-hop headers in place, including any named by `Connection`.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let connection_listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in connection_listed {
        headers.remove(&name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

pub fn is_stateful_response_header(name: &str) -> bool {
    STATEFUL_RESPONSE_HEADERS
        .iter()
        .any(|header| name.eq_ignore_ascii_case(header))
}

/// Encode `value` as an HTTP quoted-string (RFC 7230 §3.2.6).
///
/// Returns `None` if the value contains a character that cannot appear in a
/// quoted-string (control characters other than HTAB, or non-ASCII).
pub fn quoted_string(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\t' | ' '..='\u{7E}' => out.push(c),
            _ => return None,
        }
    }
    out.push('"');
    Some(out)
}
