//! Content negotiation for signed exchanges: the `Accept` and
//! `AMP-Cache-Transform` request headers.
//!
//! Both parsers are lenient tokenizers. The `AMP-Cache-Transform` value
//! grammar allows commas inside the quoted version spec, so splitting on
//! commas has to be quote-aware.

use crate::transform::SUPPORTED_VERSIONS;

/// Does the `Accept` header admit `application/signed-exchange;v=b3`?
pub fn can_satisfy(accept: &str) -> bool {
    accept.split(',').any(|member| {
        let mut parts = member.split(';');
        let Some(media_type) = parts.next() else {
            return false;
        };
        if !media_type.trim().eq_ignore_ascii_case("application/signed-exchange") {
            return false;
        }
        let mut version_ok = false;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            if key.eq_ignore_ascii_case("v") {
                version_ok = value == sxg::VERSION;
            } else if key.eq_ignore_ascii_case("q") && matches!(value.parse::<f32>(), Ok(q) if q == 0.0) {
                return false;
            }
        }
        version_ok
    })
}

/// Decide whether an `AMP-Cache-Transform` header permits sending a signed
/// exchange. On success returns the value to echo on the outer response and
/// the negotiated transform version.
pub fn should_send_sxg(header_value: &str) -> Option<(String, i64)> {
    for member in split_outside_quotes(header_value) {
        let mut parts = member.split(';');
        let identity = parts.next()?.trim();
        if identity != "any" && identity != "google" {
            continue;
        }

        let mut version_spec = None;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if key.trim() == "v" {
                version_spec = Some(value.trim().trim_matches('"').to_string());
            }
        }

        let version = match version_spec {
            Some(spec) => match highest_acceptable_version(&spec) {
                Some(version) => version,
                // Unsatisfiable spec; a later member may still match.
                None => continue,
            },
            None => *SUPPORTED_VERSIONS.iter().max()?,
        };
        return Some((format!("{identity};v=\"{version}\""), version));
    }
    None
}

/// Split a header value on commas that are not inside a quoted-string.
fn split_outside_quotes(value: &str) -> Vec<&str> {
    let mut members = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                members.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    members.push(value[start..].trim());
    members
}

/// Intersect a version spec like `1..8` or `1,3..4` with the supported set
/// and return the highest version, if any.
fn highest_acceptable_version(spec: &str) -> Option<i64> {
    let mut best = None;
    for range in spec.split(',') {
        let range = range.trim();
        let (low, high) = match range.split_once("..") {
            Some((low, high)) => (low.trim().parse().ok()?, high.trim().parse().ok()?),
            None => {
                let single: i64 = range.parse().ok()?;
                (single, single)
            }
        };
        if low > high {
            return None;
        }
        for version in SUPPORTED_VERSIONS {
            if (low..=high).contains(version) && Some(*version) > best {
                best = Some(*version);
            }
        }
    }
    best
}
