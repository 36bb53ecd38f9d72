//! Project-wide content hashing.
//!
//! Blobs and parts are addressed by the lowercase hex SHA-384 digest of
//! their bytes. The on-disk format carries no algorithm id, so changing
//! the digest invalidates every stored blob.

use sha2::{Digest, Sha384};

/// Number of hex characters in a rendered digest.
pub const HASH_HEX_LEN: usize = 96;

/// Returns a fresh streaming hasher.
pub fn new_hash() -> Sha384 {
    Sha384::new()
}

/// Hex digest of an in-memory byte slice.
pub fn hash_of(data: &[u8]) -> String {
    hex::encode(Sha384::digest(data))
}

/// Renders a finished hasher as lowercase hex.
pub fn hex_digest(hasher: Sha384) -> String {
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_width() {
        assert_eq!(hash_of(b"").len(), HASH_HEX_LEN);
        assert_eq!(hash_of(b"some data").len(), HASH_HEX_LEN);
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let mut hasher = new_hash();
        hasher.update(b"some ");
        hasher.update(b"data");
        assert_eq!(hex_digest(hasher), hash_of(b"some data"));
    }
}
