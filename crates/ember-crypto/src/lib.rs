//! Cryptographic primitives consumed by the Ember consensus core.
//!
//! The consensus core only ever sees fixed-width values: 32-byte public
//! keys, 64-byte signatures and 32-byte digests. Everything else (seed
//! handling, curve arithmetic) stays inside this crate.

pub mod digest;
pub mod keys;

pub use crate::digest::{digest, doubled_digest, DIGEST_LENGTH};
pub use crate::keys::{
    address_from_public_key, validate_address, CryptoError, PrivateKey, PublicKey, Signature,
    ADDRESS_PREFIX, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
