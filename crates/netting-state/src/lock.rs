//! Hash time locks and their unlock proofs.
//!
//! A lock is a conditional transfer of `amount` tokens that the receiver can
//! claim by revealing the preimage of `secrethash` before block `expiration`.
//!
//! # Wire Layout
//!
//! ```text
//! offset  size  field
//! 0       32    amount      (uint256, big-endian)
//! 32      32    expiration  (block number widened to uint256, big-endian)
//! 64      32    secrethash
//! ```
//!
//! The lockhash (`keccak256(encoded)`) is the merkle leaf committed to by
//! balance proofs, so this layout must match the peer and on-chain encoders
//! bit for bit.

use crate::error::{StateError, StateResult};
use crate::types::{fixed, pex, BlockNumber, Keccak256, Secret, TokenAmount};
use netting_crypto::keccak256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Size of an encoded lock.
pub const LOCK_ENCODED_LENGTH: usize = 96;

/// Hash a secret into the secrethash it unlocks.
pub fn hash_secret(secret: &[u8]) -> Keccak256 {
    keccak256(secret)
}

/// An immutable hash time lock.
///
/// `encoded` and `lockhash` are computed once at construction. Equality is
/// defined over `(amount, expiration, secrethash)`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "LockFields", into = "LockFields")]
pub struct HashTimeLock {
    amount: TokenAmount,
    expiration: BlockNumber,
    secrethash: Keccak256,
    encoded: [u8; LOCK_ENCODED_LENGTH],
    lockhash: Keccak256,
}

#[derive(Serialize, Deserialize)]
struct LockFields {
    amount: TokenAmount,
    expiration: BlockNumber,
    secrethash: Keccak256,
}

impl From<LockFields> for HashTimeLock {
    fn from(fields: LockFields) -> Self {
        HashTimeLock::new(fields.amount, fields.expiration, fields.secrethash)
    }
}

impl From<HashTimeLock> for LockFields {
    fn from(lock: HashTimeLock) -> Self {
        LockFields {
            amount: lock.amount,
            expiration: lock.expiration,
            secrethash: lock.secrethash,
        }
    }
}

impl HashTimeLock {
    /// Create a lock and compute its encoding and lockhash.
    pub fn new(amount: TokenAmount, expiration: BlockNumber, secrethash: Keccak256) -> Self {
        let mut encoded = [0u8; LOCK_ENCODED_LENGTH];
        amount.to_big_endian(&mut encoded[0..32]);
        encoded[56..64].copy_from_slice(&expiration.to_be_bytes());
        encoded[64..96].copy_from_slice(&secrethash);
        let lockhash = keccak256(&encoded);

        Self {
            amount,
            expiration,
            secrethash,
            encoded,
            lockhash,
        }
    }

    /// Create a lock from an unchecked secrethash slice.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidLock`] if `secrethash` is not 32 bytes.
    pub fn from_slices(
        amount: TokenAmount,
        expiration: BlockNumber,
        secrethash: &[u8],
    ) -> StateResult<Self> {
        let secrethash = fixed("secrethash", secrethash).map_err(StateError::InvalidLock)?;
        Ok(Self::new(amount, expiration, secrethash))
    }

    /// Decode a lock from its 96-byte wire encoding.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidLock`] on a wrong length or an expiration
    /// that does not fit in a block number.
    pub fn from_encoded(data: &[u8]) -> StateResult<Self> {
        if data.len() != LOCK_ENCODED_LENGTH {
            return Err(StateError::InvalidLock(format!(
                "encoded lock must have length {}, got {}",
                LOCK_ENCODED_LENGTH,
                data.len()
            )));
        }

        if data[32..56].iter().any(|b| *b != 0) {
            return Err(StateError::InvalidLock(
                "expiration does not fit in a block number".to_string(),
            ));
        }

        let amount = TokenAmount::from_big_endian(&data[0..32]);
        let mut expiration = [0u8; 8];
        expiration.copy_from_slice(&data[56..64]);
        let mut secrethash = [0u8; 32];
        secrethash.copy_from_slice(&data[64..96]);

        Ok(Self::new(amount, u64::from_be_bytes(expiration), secrethash))
    }

    /// Locked token amount.
    pub fn amount(&self) -> TokenAmount {
        self.amount
    }

    /// Block after which the lock can no longer be claimed.
    pub fn expiration(&self) -> BlockNumber {
        self.expiration
    }

    /// Hash of the unlocking secret.
    pub fn secrethash(&self) -> &Keccak256 {
        &self.secrethash
    }

    /// Fixed-layout wire encoding.
    pub fn encoded(&self) -> &[u8; LOCK_ENCODED_LENGTH] {
        &self.encoded
    }

    /// `keccak256(encoded)`, the merkle leaf for this lock.
    pub fn lockhash(&self) -> &Keccak256 {
        &self.lockhash
    }

    /// Whether `secret` unlocks this lock.
    pub fn is_unlocked_by(&self, secret: &[u8]) -> bool {
        hash_secret(secret) == self.secrethash
    }
}

impl PartialEq for HashTimeLock {
    fn eq(&self, other: &Self) -> bool {
        self.amount == other.amount
            && self.expiration == other.expiration
            && self.secrethash == other.secrethash
    }
}

impl Eq for HashTimeLock {}

impl Hash for HashTimeLock {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.lockhash.hash(state);
    }
}

impl fmt::Debug for HashTimeLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTimeLock")
            .field("amount", &self.amount)
            .field("expiration", &self.expiration)
            .field("secrethash", &hex::encode(self.secrethash))
            .finish()
    }
}

impl fmt::Display for HashTimeLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<HashTimeLock amount:{} expiration:{} secrethash:{}>",
            self.amount,
            self.expiration,
            pex(&self.secrethash)
        )
    }
}

/// A lock paired with the secret that unlocks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockPartialProofState {
    /// The lock being claimed.
    pub lock: HashTimeLock,
    /// Preimage of `lock.secrethash`.
    pub secret: Secret,
}

impl UnlockPartialProofState {
    /// Pair a lock with its secret.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidSecret`] if the secret does not unlock the lock.
    pub fn new(lock: HashTimeLock, secret: Secret) -> StateResult<Self> {
        if !lock.is_unlocked_by(&secret) {
            return Err(StateError::InvalidSecret(*lock.secrethash()));
        }
        Ok(Self { lock, secret })
    }
}

impl fmt::Display for UnlockPartialProofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<UnlockPartialProofState lock:{}>", self.lock)
    }
}

/// Everything needed to claim one lock on-chain against a known locksroot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockProofState {
    /// Sibling hashes from the lock's leaf up to the root.
    pub merkle_proof: Vec<Keccak256>,
    /// Wire encoding of the lock.
    pub lock_encoded: Vec<u8>,
    /// Preimage of the lock's secrethash.
    pub secret: Secret,
}

impl UnlockProofState {
    /// Create an unlock proof.
    pub fn new(merkle_proof: Vec<Keccak256>, lock_encoded: Vec<u8>, secret: Secret) -> Self {
        Self {
            merkle_proof,
            lock_encoded,
            secret,
        }
    }

    /// Decode the lock this proof claims.
    pub fn lock(&self) -> StateResult<HashTimeLock> {
        HashTimeLock::from_encoded(&self.lock_encoded)
    }

    /// Leaf hash committed in the tree.
    pub fn lockhash(&self) -> Keccak256 {
        keccak256(&self.lock_encoded)
    }
}

impl fmt::Display for UnlockProofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proof: Vec<String> = self.merkle_proof.iter().map(hex::encode).collect();
        write!(
            f,
            "<UnlockProofState proof:{:?} lock:{}>",
            proof,
            hex::encode(&self.lock_encoded)
        )
    }
}
