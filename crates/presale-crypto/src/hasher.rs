use presale_types::Digest;

use crate::error::CryptoError;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so a leaf and an internal node over identical bytes never
/// collide.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for allocation leaves.
    pub const LEAF: Self = Self {
        domain: "presale-leaf-v1",
    };
    /// Hasher for internal Merkle nodes.
    pub const NODE: Self = Self {
        domain: "presale-node-v1",
    };
    /// Hasher for operator grant payloads.
    pub const GRANT: Self = Self {
        domain: "presale-grant-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Digest {
        self.hash_parts(&[data])
    }

    /// Hash several byte slices as one message, without copying them together.
    pub fn hash_parts(&self, parts: &[&[u8]]) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        for part in parts {
            hasher.update(part);
        }
        Digest::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as JSON with domain separation.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<Digest, CryptoError> {
        let data =
            serde_json::to_vec(value).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Hash two nodes in sorted order. The smaller digest always goes first, so
/// the result does not depend on which side a sibling sits.
pub(crate) fn hash_sorted_pair(a: &Digest, b: &Digest) -> Digest {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    ContentHasher::NODE.hash_parts(&[lo.as_bytes(), hi.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(ContentHasher::LEAF.hash(b"x"), ContentHasher::LEAF.hash(b"x"));
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        assert_ne!(ContentHasher::LEAF.hash(data), ContentHasher::NODE.hash(data));
        assert_ne!(ContentHasher::NODE.hash(data), ContentHasher::GRANT.hash(data));
    }

    #[test]
    fn parts_equal_concatenation() {
        let joined = ContentHasher::LEAF.hash(b"helloworld");
        let parts = ContentHasher::LEAF.hash_parts(&[b"hello", b"world"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn sorted_pair_is_commutative() {
        let a = Digest::from_hash([1; 32]);
        let b = Digest::from_hash([2; 32]);
        assert_eq!(hash_sorted_pair(&a, &b), hash_sorted_pair(&b, &a));
    }

    #[test]
    fn hash_json_works() {
        let value = serde_json::json!({"operator": "0x01", "permissions": ["settle"]});
        let id = ContentHasher::GRANT.hash_json(&value).unwrap();
        assert!(!id.is_null());
    }
}
