//! Balance proofs.
//!
//! A balance proof binds a nonce, the cumulative transferred amount, the
//! amount held in pending locks and the locksroot to one channel. The
//! unsigned form is what the local node computes; the signed form is what it
//! receives from (or sends to) the partner and can submit on-chain.
//!
//! Construction only checks structure. Whether a signed proof is acceptable
//! for a channel (recovered signer, expected partner, increasing nonce) is
//! decided by [`crate::end_state::NettingChannelEndState::apply_balance_proof`].
//!
//! # Packed Balance Data
//!
//! ```text
//! nonce(8) || transferred_amount(32) || locked_amount(32) || locksroot(32) || channel(20)
//! ```
//!
//! All integers are big-endian. [`BalanceProofSigned::sign`] signs
//! `keccak256` of this layout.

use crate::error::{StateError, StateResult};
use crate::types::{fixed, pex, Address, Keccak256, Nonce, Signature, TokenAmount};
use netting_crypto::{keccak256, recover_address, Secp256k1Keypair};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::fmt;

/// Length of the packed balance data.
pub const PACKED_BALANCE_LENGTH: usize = 8 + 32 + 32 + 32 + 20;

fn check_nonce(nonce: Nonce) -> StateResult<()> {
    if nonce == 0 {
        return Err(StateError::InvalidBalanceProof(
            "nonce cannot be zero".to_string(),
        ));
    }
    Ok(())
}

/// A balance proof computed locally, without a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceProofUnsigned {
    nonce: Nonce,
    transferred_amount: TokenAmount,
    locked_amount: TokenAmount,
    locksroot: Keccak256,
    channel_address: Address,
}

impl BalanceProofUnsigned {
    /// Create an unsigned balance proof.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidBalanceProof`] if `nonce` is zero.
    pub fn new(
        nonce: Nonce,
        transferred_amount: TokenAmount,
        locked_amount: TokenAmount,
        locksroot: Keccak256,
        channel_address: Address,
    ) -> StateResult<Self> {
        check_nonce(nonce)?;
        Ok(Self {
            nonce,
            transferred_amount,
            locked_amount,
            locksroot,
            channel_address,
        })
    }

    /// Create an unsigned balance proof from unchecked byte fields.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidBalanceProof`] on a zero nonce or a
    /// `locksroot`/`channel_address` of the wrong width.
    pub fn from_slices(
        nonce: Nonce,
        transferred_amount: TokenAmount,
        locked_amount: TokenAmount,
        locksroot: &[u8],
        channel_address: &[u8],
    ) -> StateResult<Self> {
        let locksroot = fixed("locksroot", locksroot).map_err(StateError::InvalidBalanceProof)?;
        let channel_address =
            fixed("channel_address", channel_address).map_err(StateError::InvalidBalanceProof)?;
        Self::new(nonce, transferred_amount, locked_amount, locksroot, channel_address)
    }

    /// Strictly increasing per sender and channel.
    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    /// Cumulative amount transferred to the partner.
    pub fn transferred_amount(&self) -> TokenAmount {
        self.transferred_amount
    }

    /// Sum of the amounts of all pending locks.
    pub fn locked_amount(&self) -> TokenAmount {
        self.locked_amount
    }

    /// Merkle root over the pending locks.
    pub fn locksroot(&self) -> &Keccak256 {
        &self.locksroot
    }

    /// Channel this proof belongs to.
    pub fn channel_address(&self) -> &Address {
        &self.channel_address
    }

    /// Canonical packed encoding of the balance data.
    pub fn packed(&self) -> [u8; PACKED_BALANCE_LENGTH] {
        let mut data = [0u8; PACKED_BALANCE_LENGTH];
        data[0..8].copy_from_slice(&self.nonce.to_be_bytes());
        self.transferred_amount.to_big_endian(&mut data[8..40]);
        self.locked_amount.to_big_endian(&mut data[40..72]);
        data[72..104].copy_from_slice(&self.locksroot);
        data[104..124].copy_from_slice(&self.channel_address);
        data
    }

    /// `keccak256(packed())`.
    pub fn message_hash(&self) -> Keccak256 {
        keccak256(&self.packed())
    }
}

impl fmt::Display for BalanceProofUnsigned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<BalanceProofUnsigned nonce:{} transferred_amount:{} locked_amount:{} locksroot:{} channel_address:{}>",
            self.nonce,
            self.transferred_amount,
            self.locked_amount,
            pex(&self.locksroot),
            pex(&self.channel_address),
        )
    }
}

/// A balance proof authenticated by its sender's signature.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceProofSigned {
    nonce: Nonce,
    transferred_amount: TokenAmount,
    locked_amount: TokenAmount,
    locksroot: Keccak256,
    channel_address: Address,
    message_hash: Keccak256,
    #[serde_as(as = "Bytes")]
    signature: Signature,
    sender: Address,
}

impl BalanceProofSigned {
    /// Create a signed balance proof. The signature is not checked here.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidBalanceProof`] if `nonce` is zero.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        nonce: Nonce,
        transferred_amount: TokenAmount,
        locked_amount: TokenAmount,
        locksroot: Keccak256,
        channel_address: Address,
        message_hash: Keccak256,
        signature: Signature,
        sender: Address,
    ) -> StateResult<Self> {
        check_nonce(nonce)?;
        Ok(Self {
            nonce,
            transferred_amount,
            locked_amount,
            locksroot,
            channel_address,
            message_hash,
            signature,
            sender,
        })
    }

    /// Create a signed balance proof from unchecked byte fields.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidBalanceProof`] if any byte field has the
    /// wrong width or `nonce` is zero.
    #[allow(clippy::too_many_arguments)]
    pub fn from_slices(
        nonce: Nonce,
        transferred_amount: TokenAmount,
        locked_amount: TokenAmount,
        locksroot: &[u8],
        channel_address: &[u8],
        message_hash: &[u8],
        signature: &[u8],
        sender: &[u8],
    ) -> StateResult<Self> {
        let invalid = StateError::InvalidBalanceProof;
        Self::new(
            nonce,
            transferred_amount,
            locked_amount,
            fixed("locksroot", locksroot).map_err(invalid)?,
            fixed("channel_address", channel_address).map_err(invalid)?,
            fixed("message_hash", message_hash).map_err(invalid)?,
            fixed("signature", signature).map_err(invalid)?,
            fixed("sender", sender).map_err(invalid)?,
        )
    }

    /// Sign `unsigned` with `keypair`, over the hash of its packed data.
    pub fn sign(unsigned: &BalanceProofUnsigned, keypair: &Secp256k1Keypair) -> StateResult<Self> {
        let message_hash = unsigned.message_hash();
        let signature = keypair.sign(&message_hash)?;

        Self::new(
            unsigned.nonce,
            unsigned.transferred_amount,
            unsigned.locked_amount,
            unsigned.locksroot,
            unsigned.channel_address,
            message_hash,
            signature,
            keypair.address(),
        )
    }

    /// Lift a wire envelope into a signed balance proof.
    pub fn from_envelope(envelope: &BalanceProofEnvelope) -> StateResult<Self> {
        Self::from_slices(
            envelope.nonce,
            envelope.transferred_amount,
            envelope.locked_amount,
            &envelope.locksroot,
            &envelope.channel,
            &envelope.message_hash,
            &envelope.signature,
            &envelope.sender,
        )
    }

    /// Strictly increasing per sender and channel.
    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    /// Cumulative amount transferred to the partner.
    pub fn transferred_amount(&self) -> TokenAmount {
        self.transferred_amount
    }

    /// Sum of the amounts of all pending locks.
    pub fn locked_amount(&self) -> TokenAmount {
        self.locked_amount
    }

    /// Merkle root over the pending locks.
    pub fn locksroot(&self) -> &Keccak256 {
        &self.locksroot
    }

    /// Channel this proof belongs to.
    pub fn channel_address(&self) -> &Address {
        &self.channel_address
    }

    /// Hash the signature was produced over.
    pub fn message_hash(&self) -> &Keccak256 {
        &self.message_hash
    }

    /// 65-byte recoverable signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Claimed signer.
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// The balance data without the signature.
    pub fn unsigned(&self) -> BalanceProofUnsigned {
        BalanceProofUnsigned {
            nonce: self.nonce,
            transferred_amount: self.transferred_amount,
            locked_amount: self.locked_amount,
            locksroot: self.locksroot,
            channel_address: self.channel_address,
        }
    }

    /// Address recovered from the signature, `None` if recovery fails.
    pub fn recover_signer(&self) -> Option<Address> {
        recover_address(&self.message_hash, &self.signature)
    }

    /// Check that `message_hash` commits to this proof's fields and that the
    /// signature over it recovers to `sender`.
    ///
    /// # Errors
    /// * [`StateError::InvalidBalanceProof`] if `message_hash` is not the hash
    ///   of the packed balance data
    /// * [`StateError::InvalidSignature`] if the signer is not `sender`
    pub fn verify_signer(&self) -> StateResult<()> {
        let expected = self.unsigned().message_hash();
        if self.message_hash != expected {
            return Err(StateError::InvalidBalanceProof(format!(
                "message hash {} does not match balance data hash {}",
                hex::encode(self.message_hash),
                hex::encode(expected)
            )));
        }

        match self.recover_signer() {
            Some(signer) if signer == self.sender => Ok(()),
            Some(signer) => Err(StateError::InvalidSignature(format!(
                "signature recovers to {}, sender is {}",
                hex::encode(signer),
                hex::encode(self.sender)
            ))),
            None => Err(StateError::InvalidSignature(
                "signer could not be recovered".to_string(),
            )),
        }
    }
}

impl fmt::Display for BalanceProofSigned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<BalanceProofSigned nonce:{} transferred_amount:{} locked_amount:{} locksroot:{} channel_address:{} message_hash:{} signature:{} sender:{}>",
            self.nonce,
            self.transferred_amount,
            self.locked_amount,
            pex(&self.locksroot),
            pex(&self.channel_address),
            pex(&self.message_hash),
            pex(&self.signature),
            pex(&self.sender),
        )
    }
}

/// Balance proof fields as carried by a signed transfer message.
///
/// Byte fields are raw so that width errors in peer data surface as
/// [`StateError::InvalidBalanceProof`] rather than at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceProofEnvelope {
    pub nonce: Nonce,
    pub transferred_amount: TokenAmount,
    pub locked_amount: TokenAmount,
    pub locksroot: Vec<u8>,
    pub channel: Vec<u8>,
    pub message_hash: Vec<u8>,
    pub signature: Vec<u8>,
    pub sender: Vec<u8>,
}

impl From<&BalanceProofSigned> for BalanceProofEnvelope {
    fn from(proof: &BalanceProofSigned) -> Self {
        Self {
            nonce: proof.nonce,
            transferred_amount: proof.transferred_amount,
            locked_amount: proof.locked_amount,
            locksroot: proof.locksroot.to_vec(),
            channel: proof.channel_address.to_vec(),
            message_hash: proof.message_hash.to_vec(),
            signature: proof.signature.to_vec(),
            sender: proof.sender.to_vec(),
        }
    }
}

/// Lift a wire envelope into a signed balance proof.
pub fn balance_proof_from_envelope(
    envelope: &BalanceProofEnvelope,
) -> StateResult<BalanceProofSigned> {
    BalanceProofSigned::from_envelope(envelope)
}
