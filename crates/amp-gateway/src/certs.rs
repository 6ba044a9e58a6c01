//! The certificate collaborator: where signing certificates come from and
//! how they are named in cert URLs.
//!
//! Acquisition, renewal and OCSP stapling live outside this service; the
//! gateway only needs the DER chain, the end-entity hash, and a stable
//! URL-safe name. [`StaticCertProvider`] loads a PEM chain from disk once at
//! startup.

use anyhow::Context;
use base64::{engine::general_purpose, Engine};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Path prefix under which certificate chains are served.
pub const CERT_URL_PREFIX: &str = "/amppkg/cert/";

/// Path at which the validity map is served.
pub const VALIDITY_MAP_PATH: &str = "/amppkg/validity";

/// A certificate chain snapshot, immutable for the duration of a request.
pub struct CertSet {
    /// DER certificates, end-entity first.
    pub certs_der: Vec<Vec<u8>>,
    /// SHA-256 of the end-entity certificate.
    pub sha256: [u8; 32],
    /// URL-safe name of the chain: unpadded base64url of `sha256`.
    pub fingerprint_name: String,
}

impl CertSet {
    pub fn new(certs_der: Vec<Vec<u8>>) -> anyhow::Result<Self> {
        let end_entity = certs_der
            .first()
            .context("certificate chain is empty")?;
        let sha256: [u8; 32] = Sha256::digest(end_entity).into();
        let fingerprint_name = general_purpose::URL_SAFE_NO_PAD.encode(sha256);
        Ok(Self {
            certs_der,
            sha256,
            fingerprint_name,
        })
    }
}

/// Hands out the latest certificate chain. Must be safe under concurrent
/// read; the returned snapshot stays valid for the whole request.
pub trait CertProvider: Send + Sync {
    fn latest(&self) -> Arc<CertSet>;
}

/// A provider over a chain loaded once from a PEM file.
pub struct StaticCertProvider {
    set: Arc<CertSet>,
}

impl StaticCertProvider {
    pub fn from_pem_file(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening certificate file {}", path.display()))?;
        let certs_der = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("reading certificates from {}", path.display()))?
            .into_iter()
            .map(|cert| cert.as_ref().to_vec())
            .collect();
        Ok(Self {
            set: Arc::new(CertSet::new(certs_der)?),
        })
    }
}

impl CertProvider for StaticCertProvider {
    fn latest(&self) -> Arc<CertSet> {
        Arc::clone(&self.set)
    }
}

/// Load the ECDSA P-256 signing key from a PKCS#8 PEM file.
pub fn load_signing_key(path: &Path) -> anyhow::Result<EcdsaKeyPair> {
    let file =
        File::open(path).with_context(|| format!("opening key file {}", path.display()))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("reading key from {}", path.display()))?
        .with_context(|| format!("no private key found in {}", path.display()))?;

    let rustls_pki_types::PrivateKeyDer::Pkcs8(pkcs8) = key else {
        anyhow::bail!("signing key must be PKCS#8-encoded ECDSA P-256");
    };
    EcdsaKeyPair::from_pkcs8(
        &ECDSA_P256_SHA256_ASN1_SIGNING,
        pkcs8.secret_pkcs8_der(),
        &SystemRandom::new(),
    )
    .map_err(|e| anyhow::anyhow!("parsing ECDSA P-256 key: {e}"))
}
