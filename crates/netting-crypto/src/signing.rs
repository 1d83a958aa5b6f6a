//! Recoverable secp256k1 signatures.
//!
//! Messages are hashed with Keccak256 before signing. Signatures are 65 bytes:
//! the 64-byte compact `r || s` followed by `v = recovery_id + 27`, the
//! encoding expected by on-chain `ecrecover`.

use crate::address::{address_from_public_key, Address};
use crate::keccak::keccak256;
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey as SecpPublicKey, Secp256k1, SecretKey};
use thiserror::Error;
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a wire signature.
pub const SIGNATURE_LENGTH: usize = 65;

/// Offset added to the raw recovery id on the wire.
pub const RECOVERY_ID_OFFSET: u8 = 27;

/// A 65-byte recoverable signature (`r || s || v`).
pub type Signature = [u8; SIGNATURE_LENGTH];

/// An uncompressed secp256k1 public key (`0x04 || x || y`).
pub type PublicKey = [u8; 65];

/// Errors that can occur during signing and recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The signature is malformed (wrong length or recovery id).
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The provided key bytes are invalid.
    #[error("Invalid key bytes: {0}")]
    InvalidKey(String),

    /// The recovery primitive rejected the signature.
    #[error("Public key recovery failed: {0}")]
    RecoveryFailed(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// A secp256k1 keypair for signing balance proofs and messages.
///
/// # Example
/// ```
/// use netting_crypto::signing::{recover_address, Secp256k1Keypair};
///
/// let keypair = Secp256k1Keypair::generate();
/// let signature = keypair.sign(b"balance proof").unwrap();
///
/// assert_eq!(recover_address(b"balance proof", &signature), Some(keypair.address()));
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secp256k1Keypair {
    /// The 32-byte private key. Zeroized on drop.
    private_key: [u8; 32],
    #[zeroize(skip)]
    public_key: PublicKey,
    #[zeroize(skip)]
    secret_key: SecretKey,
}

impl Secp256k1Keypair {
    /// Generate a new random keypair from the operating system RNG.
    pub fn generate() -> Self {
        loop {
            let mut seed = [0u8; 32];
            OsRng.fill_bytes(&mut seed);
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(keypair) = Self::from_private_key(seed) {
                return keypair;
            }
        }
    }

    /// Create a keypair from a 32-byte private key.
    ///
    /// # Errors
    /// Returns an error if the bytes are zero or not below the curve order.
    pub fn from_private_key(private_key: [u8; 32]) -> CryptoResult<Self> {
        let secret_key = SecretKey::from_slice(&private_key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let secp = Secp256k1::new();
        let public_key = SecpPublicKey::from_secret_key(&secp, &secret_key).serialize_uncompressed();

        Ok(Self {
            private_key,
            public_key,
            secret_key,
        })
    }

    /// Create a keypair from a byte slice.
    ///
    /// # Errors
    /// Returns an error if the slice is not exactly 32 bytes or not a valid key.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let private_key: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("Expected 32 bytes, got {}", bytes.len()))
        })?;
        Self::from_private_key(private_key)
    }

    /// Sign `message` (hashed with Keccak256 first).
    pub fn sign(&self, message: &[u8]) -> CryptoResult<Signature> {
        sign_with_key(message, &self.secret_key)
    }

    /// The uncompressed public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The 20-byte address derived from the public key.
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key)
    }

    /// Get the private key as bytes.
    pub fn private_key_bytes(&self) -> &[u8; 32] {
        &self.private_key
    }
}

impl std::fmt::Debug for Secp256k1Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secp256k1Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Sign `message` with a raw 32-byte private key.
///
/// # Errors
/// Returns an error if the private key is invalid, or if the produced
/// recovery id cannot be encoded in the trailing `v` byte.
pub fn sign(message: &[u8], private_key: &[u8; 32]) -> CryptoResult<Signature> {
    let secret_key =
        SecretKey::from_slice(private_key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    sign_with_key(message, &secret_key)
}

fn sign_with_key(message: &[u8], secret_key: &SecretKey) -> CryptoResult<Signature> {
    let secp = Secp256k1::new();
    let digest = Message::from_digest(keccak256(message));
    let (recovery_id, compact) = secp
        .sign_ecdsa_recoverable(&digest, secret_key)
        .serialize_compact();

    let v = u8::try_from(recovery_id.to_i32())
        .ok()
        .and_then(|id| id.checked_add(RECOVERY_ID_OFFSET))
        .ok_or_else(|| {
            CryptoError::InvalidSignature(format!("recovery id {} out of range", recovery_id.to_i32()))
        })?;

    let mut signature = [0u8; SIGNATURE_LENGTH];
    signature[..64].copy_from_slice(&compact);
    signature[64] = v;
    Ok(signature)
}

/// Recover the uncompressed public key that produced `signature` over `message`.
///
/// # Errors
/// * [`CryptoError::InvalidSignature`] if the signature is not 65 bytes or its
///   `v` byte is not a valid offset recovery id
/// * [`CryptoError::RecoveryFailed`] if the curve arithmetic rejects it
pub fn recover_public_key(message: &[u8], signature: &[u8]) -> CryptoResult<PublicKey> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }

    let v = signature[64];
    let raw_id = v.checked_sub(RECOVERY_ID_OFFSET).ok_or_else(|| {
        CryptoError::InvalidSignature(format!("v byte {} below offset {}", v, RECOVERY_ID_OFFSET))
    })?;
    let recovery_id = RecoveryId::from_i32(i32::from(raw_id))
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

    let secp = Secp256k1::new();
    let digest = Message::from_digest(keccak256(message));
    let public_key = secp
        .recover_ecdsa(&digest, &recoverable)
        .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;

    Ok(public_key.serialize_uncompressed())
}

/// Recover the signer address, swallowing failures.
///
/// This is the entry point for untrusted peer data: a malformed or forged
/// signature is logged and reported as `None` instead of an error.
pub fn recover_address(message: &[u8], signature: &[u8]) -> Option<Address> {
    match recover_public_key(message, signature) {
        Ok(public_key) => Some(address_from_public_key(&public_key)),
        Err(CryptoError::InvalidSignature(reason)) => {
            error!("invalid signature: {}", reason);
            None
        }
        Err(CryptoError::InvalidKey(reason)) => {
            error!("invalid key data: {}", reason);
            None
        }
        Err(CryptoError::RecoveryFailed(reason)) => {
            error!("error while recovering pubkey: {}", reason);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keypair = Secp256k1Keypair::generate();
        assert_eq!(keypair.public_key()[0], 0x04);
        assert_eq!(keypair.private_key_bytes().len(), 32);
    }

    #[test]
    fn test_sign_and_recover() {
        let keypair = Secp256k1Keypair::generate();
        let message = b"netting channel";

        let signature = keypair.sign(message).unwrap();
        assert_eq!(signature.len(), SIGNATURE_LENGTH);
        assert!(signature[64] == 27 || signature[64] == 28);

        let recovered = recover_public_key(message, &signature).unwrap();
        assert_eq!(&recovered, keypair.public_key());
        assert_eq!(recover_address(message, &signature), Some(keypair.address()));
    }

    #[test]
    fn test_free_sign_matches_keypair() {
        let keypair = Secp256k1Keypair::generate();
        let signature = sign(b"msg", keypair.private_key_bytes()).unwrap();
        assert_eq!(recover_address(b"msg", &signature), Some(keypair.address()));
    }

    #[test]
    fn test_deterministic_signing() {
        // RFC6979 nonces
        let keypair = Secp256k1Keypair::generate();
        assert_eq!(keypair.sign(b"a").unwrap(), keypair.sign(b"a").unwrap());
    }

    #[test]
    fn test_recover_wrong_length() {
        for len in [0usize, 1, 64, 66, 130] {
            let bytes = vec![1u8; len];
            assert!(matches!(
                recover_public_key(b"msg", &bytes),
                Err(CryptoError::InvalidSignature(_))
            ));
            assert_eq!(recover_address(b"msg", &bytes), None);
        }
    }

    #[test]
    fn test_recover_bad_v_byte() {
        let keypair = Secp256k1Keypair::generate();
        let mut signature = keypair.sign(b"msg").unwrap();

        signature[64] = 0;
        assert!(matches!(
            recover_public_key(b"msg", &signature),
            Err(CryptoError::InvalidSignature(_))
        ));

        signature[64] = 27 + 7;
        assert!(recover_public_key(b"msg", &signature).is_err());
    }

    #[test]
    fn test_recover_wrong_message_gives_other_address() {
        let keypair = Secp256k1Keypair::generate();
        let signature = keypair.sign(b"original").unwrap();

        let recovered = recover_address(b"tampered", &signature);
        assert_ne!(recovered, Some(keypair.address()));
    }

    #[test]
    fn test_recover_garbage_signature() {
        let signature = [0u8; 64]
            .iter()
            .copied()
            .chain(std::iter::once(27))
            .collect::<Vec<u8>>();
        assert_eq!(recover_address(b"msg", &signature), None);
    }

    #[test]
    fn test_from_bytes_rejects_bad_input() {
        assert!(Secp256k1Keypair::from_bytes(&[1u8; 31]).is_err());
        assert!(Secp256k1Keypair::from_private_key([0u8; 32]).is_err());
        assert!(Secp256k1Keypair::from_private_key([0xFF; 32]).is_err());
    }

    #[test]
    fn test_from_private_key_roundtrip() {
        let keypair1 = Secp256k1Keypair::generate();
        let keypair2 = Secp256k1Keypair::from_private_key(*keypair1.private_key_bytes()).unwrap();
        assert_eq!(keypair1.address(), keypair2.address());
    }
}
