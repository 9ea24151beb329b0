/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! Replicated log entries carry a [`CryptoHash`] of their payload. Followers recompute it before
//! acknowledging an entry, and event logs print its prefix to correlate one command across replicas.
//! Hashes are provided by the [`sha2`] crate.

use std::fmt::{self, Debug, Display, Formatter};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

/// SHA256 digest of some bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping around `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash `bytes`.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = CryptoHasher::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        f.write_str(&encoded[0..7])
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoHash({})", self)
    }
}
