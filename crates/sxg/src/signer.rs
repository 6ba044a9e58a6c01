//! Signature construction over a serialized exchange.

use crate::{Exchange, Result};
use base64::{engine::general_purpose, Engine};
use ring::{rand::SystemRandom, signature::EcdsaKeyPair};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use url::Url;

/// Everything needed to produce the detached signature header.
///
/// `cert_sha256` is the SHA-256 of the end-entity certificate in DER form;
/// Chrome only honors a single signature, so exactly one certificate chain
/// (reachable via `cert_url`) is referenced.
pub struct ExchangeSigner {
    pub date: SystemTime,
    pub expires: SystemTime,
    pub cert_url: Url,
    pub cert_sha256: [u8; 32],
    pub validity_url: Url,
    /// ECDSA P-256 key, shared read-only across requests.
    pub key: Arc<EcdsaKeyPair>,
}

impl ExchangeSigner {
    pub(crate) fn signature_header_value(&self, exchange: &Exchange) -> Result<String> {
        let date = unix_seconds(self.date)?;
        let expires = unix_seconds(self.expires)?;

        let message = self.signed_message(exchange, date, expires)?;
        let signature = self.key.sign(&SystemRandom::new(), &message)?;

        Ok(format!(
            "label;sig=*{}*;validity-url=\"{}\";integrity=\"digest/mi-sha256-03\";cert-url=\"{}\";cert-sha256=*{}*;date={};expires={}",
            general_purpose::STANDARD.encode(signature.as_ref()),
            self.validity_url,
            self.cert_url,
            general_purpose::STANDARD.encode(self.cert_sha256),
            date,
            expires,
        ))
    }

    /// The byte string the signature covers, per the signed-exchange draft:
    /// 64 spaces, the context string, a zero separator, then the
    /// length-prefixed signature inputs.
    fn signed_message(&self, exchange: &Exchange, date: u64, expires: u64) -> Result<Vec<u8>> {
        let header_block = exchange.header_block();
        let validity_url = self.validity_url.as_str().as_bytes();
        let request_uri = exchange.request_uri().as_str().as_bytes();

        let mut message = Vec::with_capacity(
            64 + 20 + 34 + validity_url.len() + request_uri.len() + header_block.len() + 40,
        );
        message.extend_from_slice(&[0x20; 64]);
        message.extend_from_slice(b"HTTP Exchange 1 ");
        message.extend_from_slice(crate::VERSION.as_bytes());
        message.push(0);
        message.push(32);
        message.extend_from_slice(&self.cert_sha256);
        write_length_prefixed(&mut message, validity_url);
        message.extend_from_slice(&date.to_be_bytes());
        message.extend_from_slice(&expires.to_be_bytes());
        write_length_prefixed(&mut message, request_uri);
        write_length_prefixed(&mut message, &header_block);
        Ok(message)
    }
}

fn write_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn unix_seconds(time: SystemTime) -> Result<u64> {
    Ok(time.duration_since(UNIX_EPOCH)?.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{header, HeaderMap, HeaderValue, StatusCode};
    use ring::signature::{KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1,
        ECDSA_P256_SHA256_ASN1_SIGNING};
    use std::time::Duration;

    fn test_signer() -> ExchangeSigner {
        let rng = SystemRandom::new();
        let pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        let key =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        let date = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        ExchangeSigner {
            date,
            expires: date + Duration::from_secs(3600),
            cert_url: Url::parse("https://example.com/amppkg/cert/abc").unwrap(),
            cert_sha256: [7u8; 32],
            validity_url: Url::parse("https://example.com/amppkg/validity").unwrap(),
            key: Arc::new(key),
        }
    }

    fn signed_exchange(signer: &ExchangeSigner) -> Exchange {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        let mut exchange = Exchange::new(
            Url::parse("https://example.com/doc.html").unwrap(),
            StatusCode::OK,
            headers,
            b"payload".to_vec(),
        );
        exchange.mi_encode_payload(4096).unwrap();
        exchange.add_signature_header(signer).unwrap();
        exchange
    }

    #[test]
    fn header_value_shape() {
        let signer = test_signer();
        let exchange = signed_exchange(&signer);
        let value = signer.signature_header_value(&exchange).unwrap();

        assert!(value.starts_with("label;sig=*"));
        assert!(value.contains(";integrity=\"digest/mi-sha256-03\";"));
        assert!(value.contains(";validity-url=\"https://example.com/amppkg/validity\";"));
        assert!(value.contains(";cert-url=\"https://example.com/amppkg/cert/abc\";"));
        assert!(value.ends_with(";date=1700000000;expires=1700003600"));
    }

    #[test]
    fn signature_verifies_over_signed_message() {
        let signer = test_signer();
        let exchange = signed_exchange(&signer);

        let header_value = signer.signature_header_value(&exchange).unwrap();
        let sig_b64 = header_value
            .split("sig=*")
            .nth(1)
            .and_then(|rest| rest.split('*').next())
            .unwrap();
        let signature = general_purpose::STANDARD.decode(sig_b64).unwrap();

        let message = signer
            .signed_message(&exchange, 1_700_000_000, 1_700_003_600)
            .unwrap();
        let public_key =
            UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, signer.key.public_key().as_ref());
        public_key.verify(&message, &signature).unwrap();
    }

    #[test]
    fn serialized_framing_is_consistent() {
        let signer = test_signer();
        let exchange = signed_exchange(&signer);
        let serialized = exchange.serialize().unwrap();

        assert_eq!(&serialized[..8], b"sxg1-b3\0");
        let fallback_len = u16::from_be_bytes([serialized[8], serialized[9]]) as usize;
        assert_eq!(
            &serialized[10..10 + fallback_len],
            b"https://example.com/doc.html"
        );
        let rest = &serialized[10 + fallback_len..];
        let sig_len = u32::from_be_bytes([0, rest[0], rest[1], rest[2]]) as usize;
        let header_len = u32::from_be_bytes([0, rest[3], rest[4], rest[5]]) as usize;
        let body_offset = 6 + sig_len + header_len;
        // Payload = 8-byte record-size prefix + the original 7 bytes.
        assert_eq!(rest.len(), body_offset + 8 + 7);
        assert_eq!(&rest[body_offset + 8..], b"payload");
    }
}
