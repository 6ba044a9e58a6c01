//! Signed HTTP exchange envelope library.
//!
//! Implements the `application/signed-exchange;v=b3` wire format: MICE
//! (`mi-sha256-03`) payload encoding, the canonical CBOR response-header
//! block, the signature message, and the outer serialization. Only
//! asymmetric ECDSA P-256 signing is supported; the signature is a detached
//! structured header over the encoded exchange.

pub use crate::error::Error;
pub use crate::exchange::Exchange;
pub use crate::signer::ExchangeSigner;
pub use ring;

mod cbor;
mod error;
mod exchange;
pub mod mice;
mod signer;

type Result<T, E = Error> = std::result::Result<T, E>;

/// The signed-exchange version implemented by this crate.
pub const VERSION: &str = "b3";

/// Outer `Content-Type` of a serialized exchange.
pub const CONTENT_TYPE: &str = "application/signed-exchange;v=b3";
