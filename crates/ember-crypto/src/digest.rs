use sha2::{Digest, Sha256};

/// Width of a consensus digest in bytes.
pub const DIGEST_LENGTH: usize = 32;

/// SHA-256 digest over an arbitrary byte sequence.
pub fn digest(data: &[u8]) -> [u8; DIGEST_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Deterministic 64-byte "signature" for identities that have no private
/// key (the genesis account, AT accounts): `digest(data) || digest(digest(data))`.
pub fn doubled_digest(data: &[u8]) -> [u8; 2 * DIGEST_LENGTH] {
    let first = digest(data);
    let second = digest(&first);
    let mut out = [0u8; 2 * DIGEST_LENGTH];
    out[..DIGEST_LENGTH].copy_from_slice(&first);
    out[DIGEST_LENGTH..].copy_from_slice(&second);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        assert_eq!(digest(b"ember"), digest(b"ember"));
        assert_ne!(digest(b"ember"), digest(b"Ember"));
    }

    #[test]
    fn test_doubled_digest_structure() {
        let d = doubled_digest(b"genesis");
        assert_eq!(d.len(), 64);
        assert_eq!(&d[..32], &digest(b"genesis"));
        assert_eq!(&d[32..], &digest(&digest(b"genesis")));
    }
}
