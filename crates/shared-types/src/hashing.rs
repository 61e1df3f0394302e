//! Blake2b-256 digest helper.
//!
//! Every content-addressed identity in the ledger (aggregated reality ids,
//! conflict ids, vote payload ids) is the blake2b-256 of a canonical byte
//! layout.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Computes the blake2b-256 digest of `data`.
pub fn blake2b256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_32_bytes_and_deterministic() {
        let a = blake2b256(b"meshledger");
        let b = blake2b256(b"meshledger");
        assert_eq!(a, b);
        assert_ne!(a, blake2b256(b"meshledgers"));
    }

    #[test]
    fn test_empty_input_known_vector() {
        // blake2b-256 of the empty string.
        let digest = blake2b256(b"");
        assert_eq!(
            hex::encode(digest),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }
}
