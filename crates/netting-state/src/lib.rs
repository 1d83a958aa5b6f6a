//! Netting Channels - Off-Chain State for Two-Party Payment Channels
//!
//! This crate models the off-chain state a node keeps for its netting
//! channels: hash time locks, the merkle accounting over pending locks,
//! signed balance proofs, and the on-chain lifecycle of each channel.
//!
//! # Overview
//!
//! Two participants deposit tokens in an on-chain netting contract. They then
//! exchange signed balance proofs off-chain, each committing to:
//!
//! - the **transferred amount**, cumulative and never decreasing
//! - the **locksroot**, the merkle root over the sender's pending locks
//! - a **nonce**, strictly increasing per sender
//!
//! Only the open, close and settle transactions touch the chain. At settle
//! time either party submits unlock proofs for locks whose secret it learned.
//!
//! # Architecture
//!
//! - **[`NettingChannelEndState`]**: one participant's side, its locks, tree
//!   and latest balance proof
//! - **[`NettingChannelState`]**: both ends plus the open/close/settle
//!   transactions; the [`ChannelStatus`] is derived from them
//! - **[`NodeState`]**: the aggregate root holding payment networks,
//!   message queues, the [`PaymentMappingState`] and the message id generator
//!
//! # Example: Locked Transfer
//!
//! ```
//! use netting_crypto::Secp256k1Keypair;
//! use netting_state::{
//!     hash_secret, BalanceProofSigned, BalanceProofUnsigned, ChannelConfig, HashTimeLock,
//!     NettingChannelEndState, NettingChannelState, TokenAmount, TransactionExecutionStatus,
//! };
//!
//! let partner = Secp256k1Keypair::generate();
//! let channel_id = [0xC0; 20];
//!
//! let mut channel = NettingChannelState::open(
//!     channel_id,
//!     [0x70; 20],
//!     ChannelConfig::default(),
//!     NettingChannelEndState::new([0x01; 20], TokenAmount::from(100u64)),
//!     NettingChannelEndState::new(partner.address(), TokenAmount::from(100u64)),
//!     TransactionExecutionStatus::success(None, 1),
//! )
//! .unwrap();
//!
//! // The partner locks 10 tokens behind a secret
//! let secret = [7u8; 32];
//! let lock = HashTimeLock::new(TokenAmount::from(10u64), 50, hash_secret(&secret));
//! channel.add_partner_lock(lock.clone()).unwrap();
//!
//! // ...and signs a balance proof committing to it
//! let unsigned = BalanceProofUnsigned::new(
//!     1,
//!     TokenAmount::zero(),
//!     TokenAmount::from(10u64),
//!     channel.partner_state().merkletree().root(),
//!     channel_id,
//! )
//! .unwrap();
//! let proof = BalanceProofSigned::sign(&unsigned, &partner).unwrap();
//! channel.apply_partner_balance_proof(proof).unwrap();
//!
//! assert_eq!(channel.partner_locksroot(), *lock.lockhash());
//! assert!(channel.register_secret(lock.secrethash(), secret).unwrap());
//! ```
//!
//! # Merkle Tree
//!
//! Pairs hash as `keccak256(min || max)` and an odd layer duplicates its last
//! node, so a proof is a plain list of siblings:
//!
//! ```
//! use netting_state::{build_tree, compute_root_from_proof, merkle_root, proof_for};
//!
//! let leaves: Vec<[u8; 32]> = (1..=3u8).map(|i| [i; 32]).collect();
//! let tree = build_tree(&leaves).unwrap();
//! let proof = proof_for(&tree, &leaves[2]).unwrap();
//!
//! assert_eq!(compute_root_from_proof(&leaves[2], &proof), merkle_root(&tree));
//! ```

pub mod balance_proof;
pub mod channel;
pub mod end_state;
pub mod error;
pub mod lock;
pub mod merkle;
pub mod network;
pub mod node;
pub mod payment_mapping;
pub mod types;

// Re-export main types for convenience
pub use balance_proof::{
    balance_proof_from_envelope, BalanceProofEnvelope, BalanceProofSigned, BalanceProofUnsigned,
    PACKED_BALANCE_LENGTH,
};
pub use channel::{
    balance, distributable, ChannelConfig, ChannelStatus, NettingChannelState,
    TransactionChannelNewBalance, TransactionExecutionStatus, TransactionResult,
};
pub use end_state::NettingChannelEndState;
pub use error::{StateError, StateResult};
pub use lock::{
    hash_secret, HashTimeLock, UnlockPartialProofState, UnlockProofState, LOCK_ENCODED_LENGTH,
};
pub use merkle::{
    build_tree, compute_root_from_proof, hash_pair, merkle_root, proof_for, verify_merkle_proof,
    MerkleTree,
};
pub use network::{
    NetworkState, PaymentNetworkState, RouteState, TokenNetworkGraphState, TokenNetworkState,
};
pub use node::{MessageIdGenerator, NodeState, QueueId, SendMessage};
pub use payment_mapping::{PaymentMappingState, TaskStateId, TransferTask};
pub use types::{
    Address, BlockNumber, ChannelId, Keccak256, MessageId, Nonce, Secret, Signature, TokenAmount,
    EMPTY_MERKLE_ROOT, U256,
};
