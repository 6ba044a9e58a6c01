//! Merkle Integrity Content Encoding (`mi-sha256-03`).
//!
//! The payload is split into fixed-size records, hashed back to front: the
//! last record's proof is `SHA-256(record ‖ 0x00)`, every earlier proof is
//! `SHA-256(record ‖ next_proof ‖ 0x01)`. The encoded form interleaves
//! records with the proof of their successor, prefixed by the record size.
//! Because the chain is computed from the end, the whole payload must be in
//! memory.

use crate::{Error, Result};
use base64::{engine::general_purpose, Engine};
use sha2::{Digest, Sha256};

/// Inner `Content-Encoding` value for a MICE-encoded payload.
pub const CONTENT_ENCODING: &str = "mi-sha256-03";

/// Encode `input` with the given record size.
///
/// Returns the encoded body and the top-level integrity proof. An empty
/// payload encodes as the bare record-size prefix with proof
/// `SHA-256(0x00)`.
pub fn encode(input: &[u8], record_size: usize) -> Result<(Vec<u8>, [u8; 32])> {
    if record_size == 0 {
        return Err(Error::ZeroRecordSize);
    }

    let num_records = input.len().div_ceil(record_size).max(1);

    let mut proofs = vec![[0u8; 32]; num_records];
    for i in (0..num_records).rev() {
        let record = &input[i * record_size..((i + 1) * record_size).min(input.len())];
        let mut hasher = Sha256::new();
        hasher.update(record);
        if i == num_records - 1 {
            hasher.update([0u8]);
        } else {
            hasher.update(proofs[i + 1]);
            hasher.update([1u8]);
        }
        proofs[i].copy_from_slice(&hasher.finalize());
    }

    let mut encoded = Vec::with_capacity(8 + input.len() + 32 * (num_records - 1));
    encoded.extend_from_slice(&(record_size as u64).to_be_bytes());
    for i in 0..num_records {
        if i != 0 {
            encoded.extend_from_slice(&proofs[i]);
        }
        encoded.extend_from_slice(&input[i * record_size..((i + 1) * record_size).min(input.len())]);
    }

    Ok((encoded, proofs[0]))
}

/// Render the `Digest` header value for a top-level proof.
pub fn digest_header_value(proof: &[u8; 32]) -> String {
    format!("{}={}", CONTENT_ENCODING, general_purpose::STANDARD.encode(proof))
}
