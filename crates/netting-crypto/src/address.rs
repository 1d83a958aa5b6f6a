//! Account addresses.
//!
//! An address is the last 20 bytes of `keccak256(x || y)`, where `x || y` is
//! the uncompressed public key without its `0x04` format prefix.

use crate::keccak::keccak256;

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// A 20-byte account address.
pub type Address = [u8; ADDRESS_LENGTH];

/// Derive the address of an uncompressed 65-byte public key.
///
/// # Example
/// ```
/// use netting_crypto::address::address_from_public_key;
/// use netting_crypto::signing::Secp256k1Keypair;
///
/// let keypair = Secp256k1Keypair::generate();
/// assert_eq!(address_from_public_key(keypair.public_key()), keypair.address());
/// ```
pub fn address_from_public_key(public_key: &[u8; 65]) -> Address {
    let hash = keccak256(&public_key[1..]);
    let mut address = [0u8; ADDRESS_LENGTH];
    address.copy_from_slice(&hash[32 - ADDRESS_LENGTH..]);
    address
}

/// Parse an address from a byte slice.
///
/// Returns `None` if the slice is not exactly 20 bytes.
pub fn address_from_slice(bytes: &[u8]) -> Option<Address> {
    bytes.try_into().ok()
}
