//! Primitive aliases shared by the state model.

pub use netting_crypto::{Address, Signature};
pub use primitive_types::U256;

/// A 32-byte Keccak256 digest.
pub type Keccak256 = [u8; 32];

/// The preimage of a lock's secrethash.
pub type Secret = [u8; 32];

/// A block number on the underlying chain.
pub type BlockNumber = u64;

/// Balance proof nonce.
pub type Nonce = u64;

/// Token amounts are unsigned 256-bit integers.
pub type TokenAmount = U256;

/// Channel identifiers are the netting channel contract address.
pub type ChannelId = Address;

/// Message identifier drawn from the node's generator.
pub type MessageId = u64;

/// The canonical root of the empty merkle tree.
pub const EMPTY_MERKLE_ROOT: Keccak256 = [0u8; 32];

/// Short hex form used in `Display` impls: the first four bytes.
pub(crate) fn pex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(4)])
}

/// Copy a slice into a fixed-width array, reporting the field on mismatch.
pub(crate) fn fixed<const N: usize>(field: &str, bytes: &[u8]) -> Result<[u8; N], String> {
    bytes
        .try_into()
        .map_err(|_| format!("{} must have length {}, got {}", field, N, bytes.len()))
}
