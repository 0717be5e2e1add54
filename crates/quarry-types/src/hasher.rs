use crate::object::ObjectId;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"quarry-blob-v1"`) that is
/// prepended to every hash computation, so a blob and a tree with identical
/// payload bytes never share an identifier.
#[derive(Debug)]
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for commit objects.
    pub const COMMIT: Self = Self {
        domain: "quarry-commit-v1",
    };
    /// Hasher for tree objects.
    pub const TREE: Self = Self {
        domain: "quarry-tree-v1",
    };
    /// Hasher for blob objects.
    pub const BLOB: Self = Self {
        domain: "quarry-blob-v1",
    };
    /// Hasher for annotated tag objects.
    pub const TAG: Self = Self {
        domain: "quarry-tag-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ObjectId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ObjectId::from_hash(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected object ID.
    pub fn verify(&self, data: &[u8], expected: &ObjectId) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(
            ContentHasher::BLOB.hash(b"hello world"),
            ContentHasher::BLOB.hash(b"hello world")
        );
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        let hashes = [
            ContentHasher::COMMIT.hash(data),
            ContentHasher::TREE.hash(data),
            ContentHasher::BLOB.hash(data),
            ContentHasher::TAG.hash(data),
        ];
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::BLOB.hash(b"original");
        assert!(ContentHasher::BLOB.verify(b"original", &id));
        assert!(!ContentHasher::BLOB.verify(b"tampered", &id));
    }

    #[test]
    fn domain_separated_hash_differs_from_raw() {
        assert_ne!(ContentHasher::BLOB.hash(b"x"), ObjectId::from_bytes(b"x"));
        assert_eq!(ContentHasher::new("custom-v1").domain(), "custom-v1");
    }
}
