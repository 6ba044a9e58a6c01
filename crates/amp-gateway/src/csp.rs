//! Content-Security-Policy rewriting for signed documents.
//!
//! A publisher CSP can break the transformed document when served from the
//! cache, so only a small set of directives is allowed through; the rest are
//! replaced by a fixed policy. The parser is deliberately a lenient
//! tokenizer, not a full CSP grammar.

/// Directives preserved verbatim from the fetched policy.
const PASS_THROUGH_DIRECTIVES: &[&str] = &[
    "base-uri",
    "block-all-mixed-content",
    "font-src",
    "form-action",
    "manifest-src",
    "referrer",
    "upgrade-insecure-requests",
];

/// The fixed policy appended after any preserved directives.
const CSP_SUFFIX: &str = concat!(
    "default-src * blob: data:;",
    "report-uri https://csp.withgoogle.com/csp/amp;",
    "script-src blob: https://cdn.ampproject.org/rtv/ ",
    "https://cdn.ampproject.org/v0.js ",
    "https://cdn.ampproject.org/v0/ ",
    "https://cdn.ampproject.org/lts/ ",
    "https://cdn.ampproject.org/viewer/;",
    "style-src 'unsafe-inline' https://cdn.materialdesignicons.com ",
    "https://cloud.typography.com https://fast.fonts.net ",
    "https://fonts.googleapis.com https://maxcdn.bootstrapcdn.com ",
    "https://p.typekit.net https://pro.fontawesome.com ",
    "https://use.fontawesome.com https://use.typekit.net;",
    "object-src 'none'"
);

/// Splitter for directive tokens: ASCII whitespace plus U+000B vertical tab,
/// which the CSP spec's definition of whitespace includes.
fn is_directive_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\u{0B}' | '\u{0C}')
}

/// Rewrite a fetched Content-Security-Policy so it cannot break the
/// document on the cache: pass-through directives survive with their source
/// expressions, everything else is dropped, and the fixed suffix is
/// appended.
pub fn rewrite(fetched: &str) -> String {
    let mut out = String::new();
    for directive in fetched.split(';') {
        let trimmed = directive.trim();
        let Some(name) = trimmed.split(is_directive_whitespace).find(|p| !p.is_empty()) else {
            continue;
        };
        if PASS_THROUGH_DIRECTIVES
            .iter()
            .any(|allowed| name.eq_ignore_ascii_case(allowed))
        {
            out.push_str(trimmed);
            out.push(';');
        }
    }
    out.push_str(CSP_SUFFIX);
    out
}
