//! Keccak256 hashing.
//!
//! This is the Ethereum flavour of SHA3 (original Keccak padding), used for
//! lock hashes, merkle nodes, secret hashes, message digests and addresses.

use sha3::{Digest, Keccak256};

/// Compute the Keccak256 hash of the input data.
///
/// # Arguments
/// * `data` - The input bytes to hash
///
/// # Returns
/// A 32-byte array containing the Keccak256 digest
///
/// # Example
/// ```
/// use netting_crypto::keccak::keccak256;
///
/// let hash = keccak256(b"secret");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the Keccak256 hash of multiple data slices.
///
/// Equivalent to hashing the concatenation of `parts` without allocating it.
///
/// # Example
/// ```
/// use netting_crypto::keccak::{keccak256, keccak256_multi};
///
/// assert_eq!(keccak256_multi(&[b"ab", b"cd"]), keccak256(b"abcd"));
/// ```
pub fn keccak256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// A streaming Keccak256 hasher that can be updated incrementally.
pub struct Keccak256Hasher {
    inner: Keccak256,
}

impl Keccak256Hasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self {
            inner: Keccak256::new(),
        }
    }

    /// Update the hasher with additional data.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize the hash and return the digest, consuming the hasher.
    pub fn finalize(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

impl Default for Keccak256Hasher {
    fn default() -> Self {
        Self::new()
    }
}
