use sha2::{Digest, Sha256};

/// A raw SHA-256 digest
pub type Hash = [u8; 32];

/// SHA-256 over the concatenation of `parts`
pub fn sha256(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Lowercase hex SHA-256 over the concatenation of `parts`
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    hex::encode(sha256(parts))
}

/// Decode a 32 byte hex digest, returning None on any malformed input
pub fn decode_hash(hex_str: &str) -> Option<Hash> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.as_slice().try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_concatenation() {
        assert_eq!(sha256_hex(&[b"ab", b"c"]), sha256_hex(&[b"abc"]));
        assert_eq!(
            sha256_hex(&[b"abc"]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn decode_hash_rejects_garbage() {
        assert!(decode_hash("zz").is_none());
        assert!(decode_hash("abcd").is_none());
        assert_eq!(decode_hash(&hex::encode([7u8; 32])), Some([7u8; 32]));
    }
}
