//! The in-memory exchange and its `b3` serialization.

use crate::{cbor::MapBuilder, mice, Error, ExchangeSigner, Result};
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use url::Url;

static DIGEST: HeaderName = HeaderName::from_static("digest");

/// File-format magic for `application/signed-exchange;v=b3`.
const MAGIC: &[u8; 8] = b"sxg1-b3\0";

/// Parsers reject signature header values above this length.
const MAX_SIGNATURE_LENGTH: usize = 16384;

/// Parsers reject header blocks above this length.
const MAX_HEADER_LENGTH: usize = 524288;

/// A request/response pair awaiting signature.
///
/// The request is implicitly `GET` with no headers; only the request URI is
/// carried, doubling as the fallback URL in the serialized form.
pub struct Exchange {
    request_uri: Url,
    response_status: StatusCode,
    /// Inner response headers. Mutations must happen before signing.
    pub response_headers: HeaderMap,
    payload: Vec<u8>,
    signature: Option<String>,
}

impl Exchange {
    pub fn new(
        request_uri: Url,
        response_status: StatusCode,
        response_headers: HeaderMap,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            request_uri,
            response_status,
            response_headers,
            payload,
            signature: None,
        }
    }

    pub fn request_uri(&self) -> &Url {
        &self.request_uri
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// MICE-encode the payload in place.
    ///
    /// Sets the inner `Content-Encoding: mi-sha256-03` and `Digest` headers;
    /// both are part of the signed header block, so this must run before
    /// [`Exchange::add_signature_header`].
    pub fn mi_encode_payload(&mut self, record_size: usize) -> Result<()> {
        let (encoded, proof) = mice::encode(&self.payload, record_size)?;
        self.response_headers.insert(
            header::CONTENT_ENCODING,
            HeaderValue::from_static(mice::CONTENT_ENCODING),
        );
        self.response_headers.insert(
            DIGEST.clone(),
            HeaderValue::from_str(&mice::digest_header_value(&proof))?,
        );
        self.payload = encoded;
        Ok(())
    }

    /// Canonical CBOR encoding of the response headers plus `:status`.
    ///
    /// Multi-valued headers are comma-joined; non-combinable headers must
    /// not reach the exchange (the packager strips them beforehand).
    pub(crate) fn header_block(&self) -> Vec<u8> {
        let mut map = MapBuilder::new();
        map.insert(b":status", self.response_status.as_str().as_bytes());
        for name in self.response_headers.keys() {
            let joined = self
                .response_headers
                .get_all(name)
                .iter()
                .map(HeaderValue::as_bytes)
                .collect::<Vec<_>>()
                .join(&b", "[..]);
            map.insert(name.as_str().as_bytes(), &joined);
        }
        map.finish()
    }

    /// Compute and attach the detached signature header.
    pub fn add_signature_header(&mut self, signer: &ExchangeSigner) -> Result<()> {
        self.signature = Some(signer.signature_header_value(self)?);
        Ok(())
    }

    /// Serialize to the `b3` wire format.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let signature = self.signature.as_deref().ok_or(Error::Unsigned)?;
        if signature.len() > MAX_SIGNATURE_LENGTH {
            return Err(Error::SignatureTooLarge(signature.len()));
        }
        let header_block = self.header_block();
        if header_block.len() > MAX_HEADER_LENGTH {
            return Err(Error::HeadersTooLarge(header_block.len()));
        }
        let fallback_url = self.request_uri.as_str().as_bytes();
        if fallback_url.len() > usize::from(u16::MAX) {
            return Err(Error::FallbackUrlTooLong(fallback_url.len()));
        }

        let mut out = Vec::with_capacity(
            MAGIC.len() + 2 + fallback_url.len() + 6 + signature.len() + header_block.len()
                + self.payload.len(),
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(fallback_url.len() as u16).to_be_bytes());
        out.extend_from_slice(fallback_url);
        out.extend_from_slice(&be24(signature.len()));
        out.extend_from_slice(&be24(header_block.len()));
        out.extend_from_slice(signature.as_bytes());
        out.extend_from_slice(&header_block);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

fn be24(value: usize) -> [u8; 3] {
    let bytes = (value as u32).to_be_bytes();
    [bytes[1], bytes[2], bytes[3]]
}
