//! Strong block checksum (BLAKE3, 256-bit)
//!
//! Confirms weak-checksum candidates during matching. Not keyed; it guards
//! against rolling-hash collisions, not against an adversary.

use std::fmt;

/// Digest length in bytes
pub const STRONG_LEN: usize = 32;

/// BLAKE3 digest of one block
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrongChecksum([u8; STRONG_LEN]);

impl StrongChecksum {
    pub const fn from_bytes(bytes: [u8; STRONG_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; STRONG_LEN] {
        &self.0
    }

    /// Lowercase hex (64 chars)
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for StrongChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrongChecksum({})", self.to_hex())
    }
}

/// Digest a byte slice in one call.
pub fn digest(data: &[u8]) -> StrongChecksum {
    StrongChecksum(*blake3::hash(data).as_bytes())
}

/// Incremental digest for blocks read in pieces.
#[derive(Default)]
pub struct StrongHasher(blake3::Hasher);

impl StrongHasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(&self) -> StrongChecksum {
        StrongChecksum(*self.0.finalize().as_bytes())
    }
}
