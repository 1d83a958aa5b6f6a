//! Netting Channel Cryptography
//!
//! Primitives shared by every layer of the channel state model:
//!
//! - **Keccak256**: lock hashes, merkle nodes, secret hashes and message digests
//! - **Recoverable secp256k1**: balance proofs carry a 65-byte signature from
//!   which the signer's public key (and thus address) is recovered
//! - **Addresses**: last 20 bytes of the hashed uncompressed public key
//!
//! # Example
//!
//! ```
//! use netting_crypto::{keccak256, recover_address, Secp256k1Keypair};
//!
//! let alice = Secp256k1Keypair::generate();
//!
//! let message_hash = keccak256(b"nonce=1 transferred=10");
//! let signature = alice.sign(&message_hash).unwrap();
//!
//! // The receiver learns who signed without being told the public key.
//! assert_eq!(recover_address(&message_hash, &signature), Some(alice.address()));
//! ```

pub mod address;
pub mod keccak;
pub mod signing;

// Re-export main types for convenience
pub use address::{address_from_public_key, address_from_slice, Address, ADDRESS_LENGTH};
pub use keccak::{keccak256, keccak256_multi, Keccak256Hasher};
pub use signing::{
    recover_address, recover_public_key, sign, CryptoError, CryptoResult, PublicKey,
    Secp256k1Keypair, Signature, RECOVERY_ID_OFFSET, SIGNATURE_LENGTH,
};

/// Generate a cryptographically secure random 32-byte array.
///
/// Used to mint lock secrets.
pub fn random_bytes_32() -> [u8; 32] {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
