//! URL-set policy: which (fetch, sign) pairs the gateway will package.

use crate::error::HttpError;
use regex::Regex;
use serde::Deserialize;
use url::Url;

/// A configured pair of URL patterns. The signature asserts the identity of
/// a URL matching `sign`; the document is fetched from a URL matching
/// `fetch`. When `fetch` is absent the gateway only self-fetches: the fetch
/// URL must equal the sign URL.
#[derive(Debug, Clone, Deserialize)]
pub struct UrlSet {
    pub sign: UrlPattern,
    #[serde(default)]
    pub fetch: Option<UrlPattern>,
    /// Refuse to sign responses carrying cookies or similar stateful
    /// headers instead of silently stripping them.
    #[serde(default)]
    pub error_on_stateful_headers: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlPattern {
    #[serde(default = "default_schemes")]
    pub scheme: Vec<String>,
    pub domain: String,
    #[serde(default)]
    pub path_regex: Option<String>,
    #[serde(default)]
    pub query_regex: Option<String>,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

fn default_schemes() -> Vec<String> {
    vec!["https".to_string()]
}

fn default_max_length() -> usize {
    2000
}

struct CompiledPattern {
    schemes: Vec<String>,
    domain: String,
    path_regex: Option<Regex>,
    query_regex: Option<Regex>,
    max_length: usize,
}

struct CompiledSet {
    sign: CompiledPattern,
    fetch: Option<CompiledPattern>,
    error_on_stateful_headers: bool,
}

/// Compiled URL sets, built once at startup.
pub struct UrlSetMatcher {
    sets: Vec<CompiledSet>,
}

impl UrlSetMatcher {
    pub fn new(sets: &[UrlSet]) -> anyhow::Result<Self> {
        let compiled = sets
            .iter()
            .map(|set| {
                Ok(CompiledSet {
                    sign: compile(&set.sign)?,
                    fetch: set.fetch.as_ref().map(compile).transpose()?,
                    error_on_stateful_headers: set.error_on_stateful_headers,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { sets: compiled })
    }

    /// Resolve the `fetch`/`sign` request inputs against the configured
    /// sets. An empty `fetch` defaults to a same-origin self-fetch. The
    /// first matching set wins and supplies `error_on_stateful_headers`.
    pub fn parse_urls(&self, fetch: &str, sign: &str) -> Result<(Url, Url, bool), HttpError> {
        let sign_url = parse_absolute(sign, "sign")?;
        let fetch_url = if fetch.is_empty() {
            sign_url.clone()
        } else {
            parse_absolute(fetch, "fetch")?
        };

        for set in &self.sets {
            if !pattern_matches(&set.sign, &sign_url) {
                continue;
            }
            let fetch_ok = match &set.fetch {
                Some(pattern) => pattern_matches(pattern, &fetch_url),
                // Self-fetch only when no fetch pattern is configured.
                None => fetch_url == sign_url,
            };
            if fetch_ok {
                return Ok((fetch_url, sign_url, set.error_on_stateful_headers));
            }
        }
        Err(HttpError::NotFound(format!(
            "no URL set matches fetch {fetch_url} sign {sign_url}"
        )))
    }
}

fn compile(pattern: &UrlPattern) -> anyhow::Result<CompiledPattern> {
    Ok(CompiledPattern {
        schemes: pattern.scheme.clone(),
        domain: pattern.domain.clone(),
        path_regex: pattern
            .path_regex
            .as_deref()
            .map(anchor_regex)
            .transpose()?,
        query_regex: pattern
            .query_regex
            .as_deref()
            .map(anchor_regex)
            .transpose()?,
        max_length: pattern.max_length,
    })
}

fn anchor_regex(source: &str) -> anyhow::Result<Regex> {
    Ok(Regex::new(&format!("^(?:{source})$"))?)
}

fn parse_absolute(raw: &str, what: &str) -> Result<Url, HttpError> {
    Url::parse(raw).map_err(|e| HttpError::BadRequest(format!("parsing {what} URL {raw:?}: {e}")))
}

fn pattern_matches(pattern: &CompiledPattern, url: &Url) -> bool {
    if url.as_str().len() > pattern.max_length {
        return false;
    }
    if !pattern.schemes.iter().any(|scheme| scheme == url.scheme()) {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    if !host.eq_ignore_ascii_case(&pattern.domain) {
        return false;
    }
    if let Some(path_regex) = &pattern.path_regex {
        if !path_regex.is_match(url.path()) {
            return false;
        }
    }
    if let Some(query_regex) = &pattern.query_regex {
        if !query_regex.is_match(url.query().unwrap_or("")) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(sets: &[UrlSet]) -> UrlSetMatcher {
        UrlSetMatcher::new(sets).unwrap()
    }

    fn sign_only_set(domain: &str, stateful_fatal: bool) -> UrlSet {
        UrlSet {
            sign: UrlPattern {
                scheme: vec!["https".into()],
                domain: domain.into(),
                path_regex: None,
                query_regex: None,
                max_length: 2000,
            },
            fetch: None,
            error_on_stateful_headers: stateful_fatal,
        }
    }

    #[test]
    fn empty_fetch_defaults_to_sign() {
        let m = matcher(&[sign_only_set("example.com", true)]);
        let (fetch, sign, stateful) = m.parse_urls("", "https://example.com/page").unwrap();
        assert_eq!(fetch, sign);
        assert!(stateful);
    }

    #[test]
    fn relative_urls_are_bad_requests() {
        let m = matcher(&[sign_only_set("example.com", false)]);
        assert!(matches!(
            m.parse_urls("", "/page"),
            Err(HttpError::BadRequest(_))
        ));
        assert!(matches!(
            m.parse_urls("page.html", "https://example.com/"),
            Err(HttpError::BadRequest(_))
        ));
    }

    #[test]
    fn unmatched_urls_are_not_found() {
        let m = matcher(&[sign_only_set("example.com", false)]);
        assert!(matches!(
            m.parse_urls("", "https://other.example/page"),
            Err(HttpError::NotFound(_))
        ));
    }

    #[test]
    fn self_fetch_only_without_fetch_pattern() {
        let m = matcher(&[sign_only_set("example.com", false)]);
        assert!(m
            .parse_urls("https://example.com/a", "https://example.com/a")
            .is_ok());
        assert!(matches!(
            m.parse_urls("https://example.com/b", "https://example.com/a"),
            Err(HttpError::NotFound(_))
        ));
    }

    #[test]
    fn separate_fetch_pattern_allows_cross_origin_fetch() {
        let mut set = sign_only_set("amp.example.com", false);
        set.fetch = Some(UrlPattern {
            scheme: vec!["http".into(), "https".into()],
            domain: "origin.example.com".into(),
            path_regex: None,
            query_regex: None,
            max_length: 2000,
        });
        let m = matcher(&[set]);
        let (fetch, sign, _) = m
            .parse_urls("http://origin.example.com/doc", "https://amp.example.com/doc")
            .unwrap();
        assert_eq!(fetch.as_str(), "http://origin.example.com/doc");
        assert_eq!(sign.as_str(), "https://amp.example.com/doc");
    }

    #[test]
    fn path_regex_is_anchored() {
        let mut set = sign_only_set("example.com", false);
        set.sign.path_regex = Some("/amp/.*".into());
        let m = matcher(&[set]);
        assert!(m.parse_urls("", "https://example.com/amp/doc").is_ok());
        assert!(m.parse_urls("", "https://example.com/other/amp/doc").is_err());
    }

    #[test]
    fn first_matching_set_wins() {
        let m = matcher(&[
            sign_only_set("example.com", true),
            sign_only_set("example.com", false),
        ]);
        let (_, _, stateful) = m.parse_urls("", "https://example.com/x").unwrap();
        assert!(stateful);
    }

    #[test]
    fn overlong_urls_do_not_match() {
        let mut set = sign_only_set("example.com", false);
        set.sign.max_length = 30;
        let m = matcher(&[set]);
        let long = format!("https://example.com/{}", "a".repeat(50));
        assert!(m.parse_urls("", &long).is_err());
    }
}
