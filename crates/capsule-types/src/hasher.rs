use crate::hash::{CapsuleHash, HASH_LEN};

/// Domain-separated BLAKE3 hasher producing 4-byte capsule hashes.
///
/// Host tooling uses this to label capsule code before delivery. The device
/// never hashes: it only compares the bytes it was given, so images built by
/// other tooling with a different hash function remain valid.
pub struct CapsuleHasher {
    domain: &'static str,
}

impl CapsuleHasher {
    /// Hasher for capsule code.
    pub const CODE: Self = Self {
        domain: "capsule-code-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash capsule code, keeping the first four digest bytes.
    pub fn hash(&self, code: &[u8]) -> CapsuleHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(code);
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest.as_bytes()[..HASH_LEN]);
        CapsuleHash::new(out)
    }

    /// Verify that code produces the expected hash.
    pub fn verify(&self, code: &[u8], expected: &CapsuleHash) -> bool {
        self.hash(code) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}
