//! Error types for the channel state model.
//!
//! Every variant here is a structural or protocol-logic violation: the
//! operation that produced it left its state untouched. Signature recovery
//! failures on untrusted data do not surface here; they are absorbed by
//! [`netting_crypto::recover_address`] and show up as `InvalidSignature`.

use crate::types::{Address, BlockNumber, Keccak256, Nonce};
use thiserror::Error;

/// Errors that can occur while building or advancing channel state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A lock could not be constructed or decoded.
    #[error("Invalid lock: {0}")]
    InvalidLock(String),

    /// A balance proof failed its structural checks.
    #[error("Invalid balance proof: {0}")]
    InvalidBalanceProof(String),

    /// A lock with this secrethash is already pending.
    #[error("Duplicate lock for secrethash {}", hex::encode(.0))]
    DuplicateLock(Keccak256),

    /// No pending lock has this secrethash.
    #[error("Lock not found for secrethash {}", hex::encode(.0))]
    LockNotFound(Keccak256),

    /// The secret does not hash to the lock's secrethash.
    #[error("Invalid secret: hash mismatch for secrethash {}", hex::encode(.0))]
    InvalidSecret(Keccak256),

    /// Balance proof nonce is not strictly greater than the last accepted one.
    #[error("Nonce not increasing: expected > {current}, got {provided}")]
    NonceNotIncreasing { current: Nonce, provided: Nonce },

    /// Balance proof lowers the transferred amount.
    #[error("Transferred amount decreased: current {current}, provided {provided}")]
    TransferredAmountDecreased { current: String, provided: String },

    /// Balance proof signed by someone other than the channel partner.
    #[error("Invalid sender: expected {}, got {}", hex::encode(.expected), hex::encode(.actual))]
    InvalidSender { expected: Address, actual: Address },

    /// Signature does not recover to the claimed sender.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Balance proof targets another channel.
    #[error("Channel mismatch: expected {}, got {}", hex::encode(.expected), hex::encode(.actual))]
    ChannelMismatch { expected: Address, actual: Address },

    /// `0 < reveal_timeout < settle_timeout` does not hold.
    #[error("Invalid timeouts: reveal_timeout {reveal_timeout}, settle_timeout {settle_timeout}")]
    InvalidTimeouts {
        reveal_timeout: BlockNumber,
        settle_timeout: BlockNumber,
    },

    /// A channel can only be built from a confirmed open transaction.
    #[error("Cannot create a channel with a non successful open transaction")]
    OpenTransactionNotSuccessful,

    /// Channel is in an invalid state for the requested operation.
    #[error("Invalid channel state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    /// The address is not a participant in this channel.
    #[error("Address {} is not a participant in this channel", hex::encode(.0))]
    UnknownParticipant(Address),

    /// A payment task already owns this secrethash.
    #[error("A task is already registered for secrethash {}", hex::encode(.0))]
    DuplicateTask(Keccak256),

    /// Leaf is not part of the merkle tree.
    #[error("Leaf {} not found in merkle tree", hex::encode(.0))]
    LeafNotFound(Keccak256),

    /// Leaf is already part of the merkle tree.
    #[error("Leaf {} already present in merkle tree", hex::encode(.0))]
    DuplicateLeaf(Keccak256),

    /// Merkle proof does not lead to the expected root.
    #[error("Merkle root mismatch: expected {}, got {}", hex::encode(.expected), hex::encode(.actual))]
    InvalidMerkleProof {
        expected: Keccak256,
        actual: Keccak256,
    },

    /// Block number went backwards.
    #[error("Block number regression: current {current}, provided {provided}")]
    BlockNumberRegression {
        current: BlockNumber,
        provided: BlockNumber,
    },

    /// A channel or network with this identifier already exists.
    #[error("Duplicate identifier {}", hex::encode(.0))]
    DuplicateIdentifier(Vec<u8>),

    /// Balance calculation overflow or underflow.
    #[error("Balance overflow during calculation")]
    BalanceOverflow,

    /// Cryptographic error.
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] netting_crypto::CryptoError),
}

/// Result type for channel state operations.
pub type StateResult<T> = Result<T, StateError>;
