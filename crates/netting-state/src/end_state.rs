//! One participant's side of a netting channel.
//!
//! Each end state tracks the locks its owner has sent and not yet resolved.
//! The merkle tree always contains exactly the lockhashes of
//! `locked ∪ unlocked`; revealing a secret moves a lock between the two maps
//! without touching the tree.
//!
//! Every mutation is all-or-nothing: on error the end state is unchanged.
//! Trees are replaced, never edited, so a clone taken before a mutation keeps
//! a tree that still matches the balance proofs issued against it.

use crate::balance_proof::BalanceProofSigned;
use crate::error::{StateError, StateResult};
use crate::lock::{hash_secret, HashTimeLock, UnlockPartialProofState, UnlockProofState};
use crate::merkle::MerkleTree;
use crate::types::{pex, Address, Keccak256, Nonce, Secret, TokenAmount};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// The state of one of the nodes in a two party netting channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NettingChannelEndState {
    address: Address,
    contract_balance: TokenAmount,
    secrethashes_to_lockedlocks: HashMap<Keccak256, HashTimeLock>,
    secrethashes_to_unlockedlocks: HashMap<Keccak256, UnlockPartialProofState>,
    merkletree: MerkleTree,
    balance_proof: Option<BalanceProofSigned>,
}

impl NettingChannelEndState {
    /// Create an end state with no locks and no balance proof.
    pub fn new(address: Address, contract_balance: TokenAmount) -> Self {
        Self {
            address,
            contract_balance,
            secrethashes_to_lockedlocks: HashMap::new(),
            secrethashes_to_unlockedlocks: HashMap::new(),
            merkletree: MerkleTree::empty(),
            balance_proof: None,
        }
    }

    /// Participant address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Total deposited on-chain by this participant.
    pub fn contract_balance(&self) -> TokenAmount {
        self.contract_balance
    }

    pub(crate) fn set_contract_balance(&mut self, contract_balance: TokenAmount) {
        self.contract_balance = contract_balance;
    }

    /// Pending locks whose secret is unknown.
    pub fn locked_locks(&self) -> &HashMap<Keccak256, HashTimeLock> {
        &self.secrethashes_to_lockedlocks
    }

    /// Pending locks whose secret is known but not yet withdrawn.
    pub fn unlocked_locks(&self) -> &HashMap<Keccak256, UnlockPartialProofState> {
        &self.secrethashes_to_unlockedlocks
    }

    /// Merkle tree over all pending locks.
    pub fn merkletree(&self) -> &MerkleTree {
        &self.merkletree
    }

    /// Latest accepted balance proof signed by this participant.
    pub fn balance_proof(&self) -> Option<&BalanceProofSigned> {
        self.balance_proof.as_ref()
    }

    /// Nonce of the latest balance proof, zero if none.
    pub fn nonce(&self) -> Nonce {
        self.balance_proof.as_ref().map_or(0, BalanceProofSigned::nonce)
    }

    /// Transferred amount of the latest balance proof, zero if none.
    pub fn transferred_amount(&self) -> TokenAmount {
        self.balance_proof
            .as_ref()
            .map_or_else(TokenAmount::zero, BalanceProofSigned::transferred_amount)
    }

    /// Sum of all pending lock amounts, locked and unlocked.
    pub fn amount_locked(&self) -> TokenAmount {
        let locked = self
            .secrethashes_to_lockedlocks
            .values()
            .map(HashTimeLock::amount);
        let unlocked = self
            .secrethashes_to_unlockedlocks
            .values()
            .map(|partial| partial.lock.amount());

        locked
            .chain(unlocked)
            .fold(TokenAmount::zero(), |total, amount| total.saturating_add(amount))
    }

    /// The pending lock for `secrethash`, from either map.
    pub fn lock_for(&self, secrethash: &Keccak256) -> Option<&HashTimeLock> {
        self.secrethashes_to_lockedlocks.get(secrethash).or_else(|| {
            self.secrethashes_to_unlockedlocks
                .get(secrethash)
                .map(|partial| &partial.lock)
        })
    }

    /// Whether `secrethash` is pending with an unknown secret.
    pub fn is_locked(&self, secrethash: &Keccak256) -> bool {
        self.secrethashes_to_lockedlocks.contains_key(secrethash)
    }

    /// Whether `secrethash` is pending with a known secret.
    pub fn is_unlocked(&self, secrethash: &Keccak256) -> bool {
        self.secrethashes_to_unlockedlocks.contains_key(secrethash)
    }

    /// Register a new pending lock and append its lockhash to the tree.
    ///
    /// # Errors
    /// Returns [`StateError::DuplicateLock`] if the secrethash is already pending.
    pub fn lock(&mut self, lock: HashTimeLock) -> StateResult<()> {
        let secrethash = *lock.secrethash();
        if self.lock_for(&secrethash).is_some() {
            return Err(StateError::DuplicateLock(secrethash));
        }

        let merkletree = self.merkletree.with_leaf(*lock.lockhash())?;

        debug!(
            "Lock {} added for {}, locksroot {}",
            pex(&secrethash),
            pex(&self.address),
            pex(&merkletree.root())
        );
        self.merkletree = merkletree;
        self.secrethashes_to_lockedlocks.insert(secrethash, lock);
        Ok(())
    }

    /// Record the secret for a pending lock.
    ///
    /// The lock moves from the locked to the unlocked map. The merkle tree is
    /// unchanged.
    ///
    /// # Errors
    /// * [`StateError::InvalidSecret`] if `keccak256(secret) != secrethash`
    /// * [`StateError::LockNotFound`] if no locked lock has this secrethash
    pub fn reveal_secret(&mut self, secrethash: &Keccak256, secret: Secret) -> StateResult<()> {
        if hash_secret(&secret) != *secrethash {
            return Err(StateError::InvalidSecret(*secrethash));
        }

        let lock = self
            .secrethashes_to_lockedlocks
            .remove(secrethash)
            .ok_or(StateError::LockNotFound(*secrethash))?;

        debug!("Secret revealed for lock {}", pex(secrethash));
        self.secrethashes_to_unlockedlocks
            .insert(*secrethash, UnlockPartialProofState { lock, secret });
        Ok(())
    }

    /// Remove a pending lock, whichever map holds it, and drop its leaf.
    ///
    /// The caller must only do this once no balance proof still in use
    /// commits to the lock.
    ///
    /// # Errors
    /// Returns [`StateError::LockNotFound`] if the secrethash is not pending.
    pub fn withdraw(&mut self, secrethash: &Keccak256) -> StateResult<HashTimeLock> {
        let lockhash = *self
            .lock_for(secrethash)
            .ok_or(StateError::LockNotFound(*secrethash))?
            .lockhash();
        let merkletree = self.merkletree.without_leaf(&lockhash)?;

        let lock = match self.secrethashes_to_lockedlocks.remove(secrethash) {
            Some(lock) => lock,
            None => self
                .secrethashes_to_unlockedlocks
                .remove(secrethash)
                .map(|partial| partial.lock)
                .ok_or(StateError::LockNotFound(*secrethash))?,
        };

        debug!(
            "Lock {} withdrawn for {}, locksroot {}",
            pex(secrethash),
            pex(&self.address),
            pex(&merkletree.root())
        );
        self.merkletree = merkletree;
        Ok(lock)
    }

    /// Merkle proof for an unlocked lock against the current tree.
    ///
    /// # Errors
    /// Returns [`StateError::LockNotFound`] if the secret for `secrethash` is
    /// not known.
    pub fn unlock_proof(&self, secrethash: &Keccak256) -> StateResult<UnlockProofState> {
        let partial = self
            .secrethashes_to_unlockedlocks
            .get(secrethash)
            .ok_or(StateError::LockNotFound(*secrethash))?;
        let merkle_proof = self.merkletree.proof_for(partial.lock.lockhash())?;

        Ok(UnlockProofState::new(
            merkle_proof,
            partial.lock.encoded().to_vec(),
            partial.secret,
        ))
    }

    /// Accept a balance proof signed by this participant.
    ///
    /// The proof must be for `channel_address`, its message hash must be the
    /// hash of its own fields, its signature must recover to its `sender`, the sender must be this end state's owner, the nonce
    /// must increase and the transferred amount must not decrease.
    ///
    /// # Errors
    /// Any violated condition is reported and the end state is unchanged.
    pub fn apply_balance_proof(
        &mut self,
        proof: BalanceProofSigned,
        channel_address: &Address,
    ) -> StateResult<()> {
        if proof.channel_address() != channel_address {
            return Err(StateError::ChannelMismatch {
                expected: *channel_address,
                actual: *proof.channel_address(),
            });
        }

        if let Err(err) = proof.verify_signer() {
            warn!("Rejecting balance proof from {}: {}", pex(proof.sender()), err);
            return Err(err);
        }

        if proof.sender() != &self.address {
            warn!(
                "Rejecting balance proof from non-partner {}",
                pex(proof.sender())
            );
            return Err(StateError::InvalidSender {
                expected: self.address,
                actual: *proof.sender(),
            });
        }

        if proof.nonce() <= self.nonce() {
            return Err(StateError::NonceNotIncreasing {
                current: self.nonce(),
                provided: proof.nonce(),
            });
        }

        if proof.transferred_amount() < self.transferred_amount() {
            return Err(StateError::TransferredAmountDecreased {
                current: self.transferred_amount().to_string(),
                provided: proof.transferred_amount().to_string(),
            });
        }

        debug!(
            "Balance proof accepted from {} nonce {}",
            pex(proof.sender()),
            proof.nonce()
        );
        self.balance_proof = Some(proof);
        Ok(())
    }
}

impl fmt::Display for NettingChannelEndState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<NettingChannelEndState address:{} contract_balance:{} merkletree:{}>",
            pex(&self.address),
            self.contract_balance,
            self.merkletree
        )
    }
}
