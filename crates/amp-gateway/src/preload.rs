//! Serialization of preload metadata as an HTTP `Link` header.

use crate::error::PackagingError;
use crate::headers::quoted_string;
use crate::transform::Preload;
use url::Url;

/// Format preload records as a `Link` header value.
///
/// Each record's URL is re-parsed, which percent-escapes any query
/// characters that are not valid URL characters (`=` and `&` stay as-is).
/// An unparseable URL or a missing `as` fails the whole call; a record
/// whose attribute value cannot be encoded as a quoted-string is silently
/// skipped. Callers should treat an empty result as "no Link header".
pub fn format_link_header(preloads: &[Preload]) -> Result<String, PackagingError> {
    let mut values = Vec::with_capacity(preloads.len());
    for preload in preloads {
        let url = Url::parse(&preload.url).map_err(|source| PackagingError::InvalidPreloadUrl {
            url: preload.url.clone(),
            source,
        })?;

        if preload.as_attr.is_empty() {
            return Err(PackagingError::MissingPreloadAs(preload.url.clone()));
        }

        let mut value = format!("<{}>;rel=preload;as={}", url, preload.as_attr);
        let mut valid = true;
        for (key, attr_value) in &preload.attributes {
            match quoted_string(attr_value) {
                Some(quoted) => {
                    value.push(';');
                    value.push_str(key);
                    value.push('=');
                    value.push_str(&quoted);
                }
                None => {
                    valid = false;
                    break;
                }
            }
        }
        if valid {
            values.push(value);
        }
    }
    Ok(values.join(","))
}
