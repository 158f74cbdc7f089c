use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest as _, Sha3_256};
use thiserror::Error;
use zeroize::Zeroize;

/// Width of a public key in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Width of a signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Human-readable prefix of every Ember address.
pub const ADDRESS_PREFIX: &str = "eb";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("invalid signature length: expected {SIGNATURE_LENGTH} bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("malformed hex input: {0}")]
    MalformedHex(#[from] hex::FromHexError),
}

/// A 32-byte Ed25519 public key.
///
/// Special identities (the genesis account, AT accounts) use key bytes that
/// are not valid curve points; signature verification for them goes through
/// [`crate::doubled_digest`] instead of Ed25519.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; PUBLIC_KEY_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_LENGTH,
                got: bytes.len(),
            })?;
        Ok(PublicKey(arr))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Verify an Ed25519 signature over `message`.
    ///
    /// Returns `false` for signatures from keys that are not valid curve
    /// points; it never errors, because "does not verify" is the only thing
    /// the consensus core needs to know.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

/// A 64-byte signature. Fixed width by contract; the composite block
/// signature is two of these concatenated.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; SIGNATURE_LENGTH] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignatureLength(bytes.len()))?;
        Ok(Signature(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

// serde does not derive for 64-byte arrays; encode as hex, matching how
// signatures appear in logs and settings files.
impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Signature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// An Ed25519 signing key. The seed is wiped from memory on drop.
pub struct PrivateKey {
    signing: SigningKey,
}

impl PrivateKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        PrivateKey {
            signing: SigningKey::generate(&mut rng),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        let mut seed = seed;
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        PrivateKey { signing }
    }

    pub fn from_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(seed_hex)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                got: bytes.len(),
            })?;
        bytes.zeroize();
        Ok(Self::from_seed(arr))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    /// Hex encoding of the seed, for operator key storage.
    pub fn seed_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Produce a fixed-length signature over an arbitrary byte sequence.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(<redacted>)")
    }
}

/// Derive the account address for a public key:
/// `"eb" + hex(first 20 bytes of SHA3-256(key))`.
pub fn address_from_public_key(key: &PublicKey) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();
    format!("{}{}", ADDRESS_PREFIX, hex::encode(&hash[..20]))
}

/// Check address shape: prefix, length and hex charset.
pub fn validate_address(address: &str) -> bool {
    let Some(body) = address.strip_prefix(ADDRESS_PREFIX) else {
        return false;
    };
    body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"block bytes");
        assert!(key.public_key().verify(b"block bytes", &sig));
        assert!(!key.public_key().verify(b"other bytes", &sig));
    }

    #[test]
    fn test_verify_wrong_key_fails() {
        let key = PrivateKey::generate();
        let other = PrivateKey::generate();
        let sig = key.sign(b"payload");
        assert!(!other.public_key().verify(b"payload", &sig));
    }

    #[test]
    fn test_verify_with_invalid_curve_point_is_false() {
        // The all-zero genesis key is not a valid curve point.
        let key = PublicKey([0u8; PUBLIC_KEY_LENGTH]);
        let sig = Signature([7u8; SIGNATURE_LENGTH]);
        assert!(!key.verify(b"anything", &sig));
    }

    #[test]
    fn test_address_format() {
        let key = PrivateKey::generate();
        let address = address_from_public_key(&key.public_key());
        assert!(validate_address(&address));
        assert_eq!(address.len(), 42);
        assert!(!validate_address("xx0011"));
        assert!(!validate_address("eb0011"));
    }

    #[test]
    fn test_seed_roundtrip() {
        let key = PrivateKey::from_seed([9u8; 32]);
        let again = PrivateKey::from_hex(&hex::encode([9u8; 32])).unwrap();
        assert_eq!(key.public_key(), again.public_key());
    }

    #[test]
    fn test_signature_serde_hex() {
        let sig = Signature([3u8; SIGNATURE_LENGTH]);
        let json = serde_json::to_string(&sig).unwrap();
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(sig, back);
    }
}
