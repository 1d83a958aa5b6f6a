//! Netting channel state machine.
//!
//! A [`NettingChannelState`] composes both end states with the on-chain
//! transactions that open, close and settle the channel.
//!
//! # Channel Lifecycle
//!
//! The status is derived from the transaction fields, never stored:
//!
//! ```text
//! opened ──close submitted──▶ waiting_for_close ──close mined──▶ closed ◀─────┐
//!    │                               │                             ▲  │        │
//!    └──────── close mined ──────────┼─────────────────────────────┘  │        │
//!                                    │                  settle submitted  settle
//!        (failure)                   ▼                                ▼    failure
//! channel_unusable ◀───────── close failure            waiting_for_settle ─────┘
//!                                                                     │
//!                                                          settle mined
//!                                                                     ▼
//!                                                                  settled
//! ```
//!
//! A close or settle mined by the partner (without a local submission) is
//! accepted from the preceding stable state. A failed settle leaves the
//! channel closed and the settle may be submitted again.

use crate::balance_proof::BalanceProofSigned;
use crate::end_state::NettingChannelEndState;
use crate::error::{StateError, StateResult};
use crate::lock::{HashTimeLock, UnlockProofState};
use crate::merkle::verify_merkle_proof;
use crate::types::{
    pex, Address, BlockNumber, ChannelId, Keccak256, Secret, TokenAmount, EMPTY_MERKLE_ROOT,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Outcome of an on-chain transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionResult {
    /// Mined and executed successfully.
    Success,
    /// Mined and reverted, or otherwise failed.
    Failure,
    /// Not yet mined, or unknown.
    Pending,
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionResult::Success => write!(f, "success"),
            TransactionResult::Failure => write!(f, "failure"),
            TransactionResult::Pending => write!(f, "pending"),
        }
    }
}

/// Represents the status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionExecutionStatus {
    /// Set only on the node that submitted the transaction.
    pub started_block: Option<BlockNumber>,
    /// Block in which the transaction was mined.
    pub finished_block: Option<BlockNumber>,
    /// Execution outcome.
    pub result: TransactionResult,
}

impl TransactionExecutionStatus {
    /// Create a status from its parts.
    pub fn new(
        started_block: Option<BlockNumber>,
        finished_block: Option<BlockNumber>,
        result: TransactionResult,
    ) -> Self {
        Self {
            started_block,
            finished_block,
            result,
        }
    }

    /// A transaction submitted (or observed) but not yet mined.
    pub fn pending(started_block: Option<BlockNumber>) -> Self {
        Self::new(started_block, None, TransactionResult::Pending)
    }

    /// A transaction mined successfully.
    pub fn success(started_block: Option<BlockNumber>, finished_block: BlockNumber) -> Self {
        Self::new(started_block, Some(finished_block), TransactionResult::Success)
    }

    /// A transaction that failed.
    pub fn failure(started_block: Option<BlockNumber>, finished_block: BlockNumber) -> Self {
        Self::new(started_block, Some(finished_block), TransactionResult::Failure)
    }

    /// Whether the transaction was mined successfully.
    pub fn is_success(&self) -> bool {
        self.result == TransactionResult::Success
    }

    /// Whether the outcome is still unknown.
    pub fn is_pending(&self) -> bool {
        self.result == TransactionResult::Pending
    }
}

impl fmt::Display for TransactionExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<TransactionExecutionStatus started:{:?} finished:{:?} result:{}>",
            self.started_block, self.finished_block, self.result
        )
    }
}

/// Channel status, derived from the open/close/settle transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelStatus {
    Opened,
    WaitingForClose,
    Closed,
    WaitingForSettle,
    Settled,
    /// Terminal failure; stored locks and proofs stay queryable.
    Unusable,
}

impl ChannelStatus {
    /// Stable name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Opened => "opened",
            ChannelStatus::WaitingForClose => "waiting_for_close",
            ChannelStatus::Closed => "closed",
            ChannelStatus::WaitingForSettle => "waiting_for_settle",
            ChannelStatus::Settled => "settled",
            ChannelStatus::Unusable => "channel_unusable",
        }
    }

    /// `opened` or `waiting_for_close`.
    pub fn is_prior_to_closed(&self) -> bool {
        matches!(self, ChannelStatus::Opened | ChannelStatus::WaitingForClose)
    }

    /// `closed`, `waiting_for_settle` or `settled`.
    pub fn is_after_close(&self) -> bool {
        matches!(
            self,
            ChannelStatus::Closed | ChannelStatus::WaitingForSettle | ChannelStatus::Settled
        )
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeouts for a netting channel, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Blocks before a lock's expiration by which its secret must be revealed.
    pub reveal_timeout: BlockNumber,
    /// Blocks between close and the earliest settle.
    pub settle_timeout: BlockNumber,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reveal_timeout: 10,
            settle_timeout: 600,
        }
    }
}

impl ChannelConfig {
    /// Check `0 < reveal_timeout < settle_timeout`.
    pub fn validate(&self) -> StateResult<()> {
        if self.reveal_timeout == 0 || self.reveal_timeout >= self.settle_timeout {
            return Err(StateError::InvalidTimeouts {
                reveal_timeout: self.reveal_timeout,
                settle_timeout: self.settle_timeout,
            });
        }
        Ok(())
    }
}

/// An on-chain deposit observed for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionChannelNewBalance {
    /// Participant whose deposit changed.
    pub participant_address: Address,
    /// The participant's new total deposit.
    pub contract_balance: TokenAmount,
    /// Block of the deposit.
    pub deposit_block_number: BlockNumber,
}

impl TransactionChannelNewBalance {
    /// Create a deposit record.
    pub fn new(
        participant_address: Address,
        contract_balance: TokenAmount,
        deposit_block_number: BlockNumber,
    ) -> Self {
        Self {
            participant_address,
            contract_balance,
            deposit_block_number,
        }
    }
}

impl fmt::Display for TransactionChannelNewBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<TransactionChannelNewBalance participant:{} balance:{} at_block:{}>",
            pex(&self.participant_address),
            self.contract_balance,
            self.deposit_block_number
        )
    }
}

/// Balance `sender` can still spend towards `receiver`:
/// `sender.deposit - sender.transferred + receiver.transferred`.
pub fn balance(
    sender: &NettingChannelEndState,
    receiver: &NettingChannelEndState,
) -> StateResult<TokenAmount> {
    sender
        .contract_balance()
        .checked_add(receiver.transferred_amount())
        .and_then(|total| total.checked_sub(sender.transferred_amount()))
        .ok_or(StateError::BalanceOverflow)
}

/// [`balance`] minus what `sender` has locked in pending transfers.
pub fn distributable(
    sender: &NettingChannelEndState,
    receiver: &NettingChannelEndState,
) -> StateResult<TokenAmount> {
    balance(sender, receiver)?
        .checked_sub(sender.amount_locked())
        .ok_or(StateError::BalanceOverflow)
}

/// The state of a netting channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NettingChannelState {
    identifier: ChannelId,
    token_address: Address,
    reveal_timeout: BlockNumber,
    settle_timeout: BlockNumber,
    our_state: NettingChannelEndState,
    partner_state: NettingChannelEndState,
    deposit_transaction_queue: Vec<TransactionChannelNewBalance>,
    open_transaction: TransactionExecutionStatus,
    close_transaction: Option<TransactionExecutionStatus>,
    settle_transaction: Option<TransactionExecutionStatus>,
}

impl NettingChannelState {
    /// Create a channel state.
    ///
    /// # Errors
    /// * [`StateError::InvalidTimeouts`] unless `0 < reveal_timeout < settle_timeout`
    /// * [`StateError::OpenTransactionNotSuccessful`] if the open transaction
    ///   did not succeed
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identifier: ChannelId,
        token_address: Address,
        reveal_timeout: BlockNumber,
        settle_timeout: BlockNumber,
        our_state: NettingChannelEndState,
        partner_state: NettingChannelEndState,
        open_transaction: TransactionExecutionStatus,
        close_transaction: Option<TransactionExecutionStatus>,
        settle_transaction: Option<TransactionExecutionStatus>,
    ) -> StateResult<Self> {
        ChannelConfig {
            reveal_timeout,
            settle_timeout,
        }
        .validate()?;

        if !open_transaction.is_success() {
            return Err(StateError::OpenTransactionNotSuccessful);
        }

        Ok(Self {
            identifier,
            token_address,
            reveal_timeout,
            settle_timeout,
            our_state,
            partner_state,
            deposit_transaction_queue: Vec::new(),
            open_transaction,
            close_transaction,
            settle_transaction,
        })
    }

    /// Create a freshly opened channel from a config.
    pub fn open(
        identifier: ChannelId,
        token_address: Address,
        config: ChannelConfig,
        our_state: NettingChannelEndState,
        partner_state: NettingChannelEndState,
        open_transaction: TransactionExecutionStatus,
    ) -> StateResult<Self> {
        Self::new(
            identifier,
            token_address,
            config.reveal_timeout,
            config.settle_timeout,
            our_state,
            partner_state,
            open_transaction,
            None,
            None,
        )
    }

    /// Channel identifier (the netting contract address).
    pub fn identifier(&self) -> &ChannelId {
        &self.identifier
    }

    /// Token held by the channel.
    pub fn token_address(&self) -> &Address {
        &self.token_address
    }

    /// Reveal timeout in blocks.
    pub fn reveal_timeout(&self) -> BlockNumber {
        self.reveal_timeout
    }

    /// Settle timeout in blocks.
    pub fn settle_timeout(&self) -> BlockNumber {
        self.settle_timeout
    }

    /// Local participant's end.
    pub fn our_state(&self) -> &NettingChannelEndState {
        &self.our_state
    }

    /// Partner's end.
    pub fn partner_state(&self) -> &NettingChannelEndState {
        &self.partner_state
    }

    /// Deposits observed but not yet finalized, in arrival order.
    pub fn deposit_transaction_queue(&self) -> &[TransactionChannelNewBalance] {
        &self.deposit_transaction_queue
    }

    pub fn open_transaction(&self) -> &TransactionExecutionStatus {
        &self.open_transaction
    }

    pub fn close_transaction(&self) -> Option<&TransactionExecutionStatus> {
        self.close_transaction.as_ref()
    }

    pub fn settle_transaction(&self) -> Option<&TransactionExecutionStatus> {
        self.settle_transaction.as_ref()
    }

    /// Derive the channel status from the transaction fields.
    pub fn status(&self) -> ChannelStatus {
        fn from_transaction(
            transaction: &TransactionExecutionStatus,
            done: ChannelStatus,
            running: ChannelStatus,
            failed: ChannelStatus,
        ) -> ChannelStatus {
            match transaction.result {
                TransactionResult::Success => done,
                TransactionResult::Pending => running,
                TransactionResult::Failure => failed,
            }
        }

        if let Some(settle) = &self.settle_transaction {
            from_transaction(
                settle,
                ChannelStatus::Settled,
                ChannelStatus::WaitingForSettle,
                ChannelStatus::Closed,
            )
        } else if let Some(close) = &self.close_transaction {
            from_transaction(
                close,
                ChannelStatus::Closed,
                ChannelStatus::WaitingForClose,
                ChannelStatus::Unusable,
            )
        } else {
            ChannelStatus::Opened
        }
    }

    /// Whether new transfers may use this channel.
    pub fn can_transfer(&self) -> bool {
        self.status() == ChannelStatus::Opened
    }

    fn require(&self, expected: &'static str, allowed: &[ChannelStatus]) -> StateResult<()> {
        let status = self.status();
        if !allowed.contains(&status) {
            return Err(StateError::InvalidState {
                expected,
                actual: status.to_string(),
            });
        }
        Ok(())
    }

    fn require_mined(result: TransactionResult) -> StateResult<()> {
        if result == TransactionResult::Pending {
            return Err(StateError::InvalidState {
                expected: "a mined transaction result",
                actual: result.to_string(),
            });
        }
        Ok(())
    }

    /// Start block of `transaction` if it is still waiting to be mined.
    fn pending_start(transaction: Option<TransactionExecutionStatus>) -> Option<BlockNumber> {
        transaction
            .filter(|tx| tx.result == TransactionResult::Pending)
            .and_then(|tx| tx.started_block)
    }

    /// The local node submitted the close transaction.
    pub fn close_submitted(&mut self, block: BlockNumber) -> StateResult<()> {
        self.require("opened", &[ChannelStatus::Opened])?;
        self.close_transaction = Some(TransactionExecutionStatus::pending(Some(block)));
        debug!("Channel {} waiting for close", pex(&self.identifier));
        Ok(())
    }

    /// A close transaction was mined, submitted by either participant.
    pub fn close_mined(&mut self, block: BlockNumber, result: TransactionResult) -> StateResult<()> {
        Self::require_mined(result)?;
        self.require(
            "opened or waiting_for_close",
            &[ChannelStatus::Opened, ChannelStatus::WaitingForClose],
        )?;

        let started_block = Self::pending_start(self.close_transaction);
        self.close_transaction = Some(TransactionExecutionStatus::new(
            started_block,
            Some(block),
            result,
        ));
        debug!("Channel {} close mined: {}", pex(&self.identifier), result);
        Ok(())
    }

    /// The local node submitted the settle transaction.
    pub fn settle_submitted(&mut self, block: BlockNumber) -> StateResult<()> {
        self.require("closed", &[ChannelStatus::Closed])?;
        self.settle_transaction = Some(TransactionExecutionStatus::pending(Some(block)));
        debug!("Channel {} waiting for settle", pex(&self.identifier));
        Ok(())
    }

    /// A settle transaction was mined, submitted by either participant.
    pub fn settle_mined(&mut self, block: BlockNumber, result: TransactionResult) -> StateResult<()> {
        Self::require_mined(result)?;
        self.require(
            "closed or waiting_for_settle",
            &[ChannelStatus::Closed, ChannelStatus::WaitingForSettle],
        )?;

        let started_block = Self::pending_start(self.settle_transaction);
        self.settle_transaction = Some(TransactionExecutionStatus::new(
            started_block,
            Some(block),
            result,
        ));
        if result == TransactionResult::Failure {
            warn!("Channel {} settle failed, channel stays closed", pex(&self.identifier));
        } else {
            debug!("Channel {} settle mined: {}", pex(&self.identifier), result);
        }
        Ok(())
    }

    /// Irrecoverable on-chain failure before the channel closed.
    pub fn mark_unusable(&mut self, block: BlockNumber) -> StateResult<()> {
        self.require(
            "opened or waiting_for_close",
            &[ChannelStatus::Opened, ChannelStatus::WaitingForClose],
        )?;

        let started_block = Self::pending_start(self.close_transaction);
        self.close_transaction = Some(TransactionExecutionStatus::failure(started_block, block));
        warn!("Channel {} is unusable", pex(&self.identifier));
        Ok(())
    }

    fn end_state(&self, participant: &Address) -> StateResult<&NettingChannelEndState> {
        if self.our_state.address() == participant {
            Ok(&self.our_state)
        } else if self.partner_state.address() == participant {
            Ok(&self.partner_state)
        } else {
            Err(StateError::UnknownParticipant(*participant))
        }
    }

    fn end_state_mut(&mut self, participant: &Address) -> StateResult<&mut NettingChannelEndState> {
        if self.our_state.address() == participant {
            Ok(&mut self.our_state)
        } else if self.partner_state.address() == participant {
            Ok(&mut self.partner_state)
        } else {
            Err(StateError::UnknownParticipant(*participant))
        }
    }

    /// Queue a deposit observed on-chain.
    ///
    /// # Errors
    /// Returns [`StateError::UnknownParticipant`] for a non-participant.
    pub fn enqueue_deposit(&mut self, deposit: TransactionChannelNewBalance) -> StateResult<()> {
        self.end_state(&deposit.participant_address)?;
        self.deposit_transaction_queue.push(deposit);
        Ok(())
    }

    /// Finalize every queued deposit at or below `confirmed_block`.
    ///
    /// Deposits apply in block order (arrival order among equal blocks). A
    /// deposit only ever raises a participant's contract balance. Returns the
    /// finalized deposits.
    ///
    /// # Errors
    /// Returns [`StateError::UnknownParticipant`] if a ready deposit names a
    /// non-participant; neither the queue nor any balance changes then.
    pub fn apply_deposits_up_to(
        &mut self,
        confirmed_block: BlockNumber,
    ) -> StateResult<Vec<TransactionChannelNewBalance>> {
        let is_ready =
            |deposit: &TransactionChannelNewBalance| deposit.deposit_block_number <= confirmed_block;
        let mut ready: Vec<_> = self
            .deposit_transaction_queue
            .iter()
            .filter(|deposit| is_ready(*deposit))
            .cloned()
            .collect();
        for deposit in &ready {
            self.end_state(&deposit.participant_address)?;
        }
        self.deposit_transaction_queue.retain(|deposit| !is_ready(deposit));

        ready.sort_by_key(|deposit| deposit.deposit_block_number);
        for deposit in &ready {
            let end_state = self.end_state_mut(&deposit.participant_address)?;
            if deposit.contract_balance > end_state.contract_balance() {
                end_state.set_contract_balance(deposit.contract_balance);
                debug!(
                    "Deposit for {} finalized: {}",
                    pex(&deposit.participant_address),
                    deposit.contract_balance
                );
            }
        }

        Ok(ready)
    }

    /// Register a lock sent by the local node.
    pub fn add_our_lock(&mut self, lock: HashTimeLock) -> StateResult<()> {
        self.require("opened", &[ChannelStatus::Opened])?;
        self.our_state.lock(lock)
    }

    /// Register a lock received from the partner.
    pub fn add_partner_lock(&mut self, lock: HashTimeLock) -> StateResult<()> {
        self.require("opened", &[ChannelStatus::Opened])?;
        self.partner_state.lock(lock)
    }

    /// Remove a settled or expired lock the local node sent.
    ///
    /// # Errors
    /// Returns [`StateError::LockNotFound`] if the secrethash is not pending.
    pub fn withdraw_our_lock(&mut self, secrethash: &Keccak256) -> StateResult<HashTimeLock> {
        self.our_state.withdraw(secrethash)
    }

    /// Remove a settled or expired lock received from the partner.
    ///
    /// # Errors
    /// Returns [`StateError::LockNotFound`] if the secrethash is not pending.
    pub fn withdraw_partner_lock(&mut self, secrethash: &Keccak256) -> StateResult<HashTimeLock> {
        self.partner_state.withdraw(secrethash)
    }

    /// Record a learned secret in whichever end states hold a matching lock.
    ///
    /// Returns whether any lock was unlocked.
    pub fn register_secret(&mut self, secrethash: &Keccak256, secret: Secret) -> StateResult<bool> {
        let mut found = false;
        for end_state in [&mut self.our_state, &mut self.partner_state] {
            if end_state.is_locked(secrethash) {
                end_state.reveal_secret(secrethash, secret)?;
                found = true;
            }
        }
        Ok(found)
    }

    /// Accept a balance proof signed by the partner for this channel.
    pub fn apply_partner_balance_proof(
        &mut self,
        proof: BalanceProofSigned,
    ) -> StateResult<()> {
        self.partner_state.apply_balance_proof(proof, &self.identifier)
    }

    /// Record a balance proof the local node signed for this channel.
    pub fn apply_our_balance_proof(
        &mut self,
        proof: BalanceProofSigned,
    ) -> StateResult<()> {
        self.our_state.apply_balance_proof(proof, &self.identifier)
    }

    /// Spendable balance of the local node.
    pub fn our_balance(&self) -> StateResult<TokenAmount> {
        balance(&self.our_state, &self.partner_state)
    }

    /// Spendable balance of the partner.
    pub fn partner_balance(&self) -> StateResult<TokenAmount> {
        balance(&self.partner_state, &self.our_state)
    }

    /// What the local node can still lock in new transfers.
    pub fn our_distributable(&self) -> StateResult<TokenAmount> {
        distributable(&self.our_state, &self.partner_state)
    }

    /// Locksroot the partner last committed to, or the empty root.
    pub fn partner_locksroot(&self) -> Keccak256 {
        self.partner_state
            .balance_proof()
            .map_or(EMPTY_MERKLE_ROOT, |proof| *proof.locksroot())
    }

    /// Unlock proofs for every partner lock whose secret the local node knows.
    pub fn claimable_unlock_proofs(&self) -> StateResult<Vec<UnlockProofState>> {
        let mut secrethashes: Vec<&Keccak256> = self.partner_state.unlocked_locks().keys().collect();
        secrethashes.sort();
        secrethashes
            .into_iter()
            .map(|secrethash| self.partner_state.unlock_proof(secrethash))
            .collect()
    }

    /// Check unlock proofs against the partner's last accepted locksroot.
    ///
    /// Each proof is checked on its own: its secret must open the lock and
    /// its merkle path must lead to the locksroot.
    ///
    /// # Errors
    /// [`StateError::InvalidState`] before the channel is closed, otherwise
    /// the first failing proof's error.
    pub fn verify_unlock_proofs(&self, proofs: &[UnlockProofState]) -> StateResult<()> {
        let status = self.status();
        if !status.is_after_close() {
            return Err(StateError::InvalidState {
                expected: "closed, waiting_for_settle or settled",
                actual: status.to_string(),
            });
        }

        let locksroot = self.partner_locksroot();
        for proof in proofs {
            let lock = proof.lock()?;
            if !lock.is_unlocked_by(&proof.secret) {
                return Err(StateError::InvalidSecret(*lock.secrethash()));
            }
            verify_merkle_proof(&locksroot, &proof.lockhash(), &proof.merkle_proof)?;
        }
        Ok(())
    }
}

impl fmt::Display for NettingChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<NettingChannelState id:{} status:{} opened:{} closed:{:?} settled:{:?}>",
            pex(&self.identifier),
            self.status(),
            self.open_transaction,
            self.close_transaction.map(|tx| tx.result),
            self.settle_transaction.map(|tx| tx.result),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance_proof::BalanceProofUnsigned;
    use crate::lock::hash_secret;
    use netting_crypto::Secp256k1Keypair;

    const CHANNEL: ChannelId = [0xC0; 20];
    const TOKEN: Address = [0x70; 20];
    const OUR: Address = [0x01; 20];
    const PARTNER: Address = [0x02; 20];

    fn end_states() -> (NettingChannelEndState, NettingChannelEndState) {
        (
            NettingChannelEndState::new(OUR, TokenAmount::from(100u64)),
            NettingChannelEndState::new(PARTNER, TokenAmount::from(50u64)),
        )
    }

    fn channel() -> NettingChannelState {
        let (ours, partner) = end_states();
        NettingChannelState::open(
            CHANNEL,
            TOKEN,
            ChannelConfig::default(),
            ours,
            partner,
            TransactionExecutionStatus::success(Some(1), 2),
        )
        .unwrap()
    }

    #[test]
    fn test_timeouts_validated() {
        for (reveal, settle) in [(10, 10), (11, 10), (0, 10)] {
            let (ours, partner) = end_states();
            let result = NettingChannelState::new(
                CHANNEL,
                TOKEN,
                reveal,
                settle,
                ours,
                partner,
                TransactionExecutionStatus::success(None, 1),
                None,
                None,
            );
            assert!(matches!(result, Err(StateError::InvalidTimeouts { .. })));
        }
    }

    #[test]
    fn test_open_transaction_must_succeed() {
        for open in [
            TransactionExecutionStatus::pending(Some(1)),
            TransactionExecutionStatus::failure(Some(1), 2),
        ] {
            let (ours, partner) = end_states();
            let result = NettingChannelState::open(
                CHANNEL,
                TOKEN,
                ChannelConfig::default(),
                ours,
                partner,
                open,
            );
            assert!(matches!(result, Err(StateError::OpenTransactionNotSuccessful)));
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut channel = channel();
        assert_eq!(channel.status(), ChannelStatus::Opened);
        assert!(channel.can_transfer());

        channel.close_submitted(10).unwrap();
        assert_eq!(channel.status(), ChannelStatus::WaitingForClose);
        assert!(!channel.can_transfer());

        channel.close_mined(12, TransactionResult::Success).unwrap();
        assert_eq!(channel.status(), ChannelStatus::Closed);
        assert_eq!(channel.close_transaction().unwrap().started_block, Some(10));

        channel.settle_submitted(700).unwrap();
        assert_eq!(channel.status(), ChannelStatus::WaitingForSettle);

        channel.settle_mined(701, TransactionResult::Success).unwrap();
        assert_eq!(channel.status(), ChannelStatus::Settled);
        assert!(channel.status().is_after_close());
    }

    #[test]
    fn test_failed_settle_returns_to_closed() {
        let mut channel = channel();
        channel.close_mined(12, TransactionResult::Success).unwrap();
        channel.settle_submitted(700).unwrap();
        channel.settle_mined(701, TransactionResult::Failure).unwrap();

        assert_eq!(channel.status(), ChannelStatus::Closed);
        assert_eq!(
            channel.settle_transaction().unwrap().result,
            TransactionResult::Failure
        );
        assert!(!channel.can_transfer());
        channel.verify_unlock_proofs(&[]).unwrap();
        assert!(channel.mark_unusable(702).is_err());

        channel.settle_submitted(710).unwrap();
        assert_eq!(channel.status(), ChannelStatus::WaitingForSettle);
        assert_eq!(channel.settle_transaction().unwrap().started_block, Some(710));

        channel.settle_mined(711, TransactionResult::Success).unwrap();
        assert_eq!(channel.status(), ChannelStatus::Settled);
        assert_eq!(channel.settle_transaction().unwrap().started_block, Some(710));
    }

    #[test]
    fn test_partner_settle_after_failed_settle() {
        let mut channel = channel();
        channel.close_mined(12, TransactionResult::Success).unwrap();
        channel.settle_submitted(700).unwrap();
        channel.settle_mined(701, TransactionResult::Failure).unwrap();

        channel.settle_mined(705, TransactionResult::Success).unwrap();
        assert_eq!(channel.status(), ChannelStatus::Settled);
        assert_eq!(channel.settle_transaction().unwrap().started_block, None);
    }

    #[test]
    fn test_partner_close_skips_waiting() {
        let mut channel = channel();
        channel.close_mined(20, TransactionResult::Success).unwrap();

        assert_eq!(channel.status(), ChannelStatus::Closed);
        assert_eq!(channel.close_transaction().unwrap().started_block, None);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut channel = channel();
        assert!(matches!(
            channel.settle_submitted(5),
            Err(StateError::InvalidState { .. })
        ));
        assert!(channel.close_mined(5, TransactionResult::Pending).is_err());

        channel.close_submitted(5).unwrap();
        assert!(channel.close_submitted(6).is_err());

        channel.close_mined(7, TransactionResult::Success).unwrap();
        assert!(channel.mark_unusable(8).is_err());
        assert!(channel.close_mined(8, TransactionResult::Success).is_err());
    }

    #[test]
    fn test_unusable_from_prior_to_closed() {
        let mut opened = channel();
        opened.mark_unusable(3).unwrap();
        assert_eq!(opened.status(), ChannelStatus::Unusable);
        assert!(!opened.can_transfer());
        assert!(opened.add_our_lock(HashTimeLock::new(TokenAmount::one(), 9, [1; 32])).is_err());

        let mut closing = channel();
        closing.close_submitted(3).unwrap();
        closing.close_mined(4, TransactionResult::Failure).unwrap();
        assert_eq!(closing.status(), ChannelStatus::Unusable);
        assert!(closing.close_submitted(5).is_err());
    }

    #[test]
    fn test_unusable_keeps_locks_queryable() {
        let mut channel = channel();
        let lock = HashTimeLock::new(TokenAmount::from(5u64), 40, hash_secret(&[7; 32]));
        channel.add_partner_lock(lock.clone()).unwrap();
        channel.mark_unusable(3).unwrap();

        assert_eq!(channel.partner_state().lock_for(lock.secrethash()), Some(&lock));
    }

    #[test]
    fn test_status_names() {
        assert_eq!(ChannelStatus::Unusable.to_string(), "channel_unusable");
        assert_eq!(ChannelStatus::WaitingForSettle.as_str(), "waiting_for_settle");
        assert!(ChannelStatus::WaitingForClose.is_prior_to_closed());
        assert!(!ChannelStatus::Closed.is_prior_to_closed());
    }

    #[test]
    fn test_deposits_apply_in_block_order() {
        let mut channel = channel();
        channel
            .enqueue_deposit(TransactionChannelNewBalance::new(OUR, TokenAmount::from(300u64), 20))
            .unwrap();
        channel
            .enqueue_deposit(TransactionChannelNewBalance::new(OUR, TokenAmount::from(200u64), 10))
            .unwrap();
        channel
            .enqueue_deposit(TransactionChannelNewBalance::new(PARTNER, TokenAmount::from(80u64), 30))
            .unwrap();

        let applied = channel.apply_deposits_up_to(25).unwrap();
        let blocks: Vec<_> = applied.iter().map(|d| d.deposit_block_number).collect();
        assert_eq!(blocks, vec![10, 20]);
        assert_eq!(channel.our_state().contract_balance(), TokenAmount::from(300u64));
        assert_eq!(channel.partner_state().contract_balance(), TokenAmount::from(50u64));
        assert_eq!(channel.deposit_transaction_queue().len(), 1);

        channel.apply_deposits_up_to(30).unwrap();
        assert_eq!(channel.partner_state().contract_balance(), TokenAmount::from(80u64));
        assert!(channel.deposit_transaction_queue().is_empty());
    }

    #[test]
    fn test_stale_deposit_does_not_lower_balance() {
        let mut channel = channel();
        channel
            .enqueue_deposit(TransactionChannelNewBalance::new(OUR, TokenAmount::from(10u64), 5))
            .unwrap();
        channel.apply_deposits_up_to(5).unwrap();
        assert_eq!(channel.our_state().contract_balance(), TokenAmount::from(100u64));
    }

    #[test]
    fn test_failed_deposit_batch_keeps_queue() {
        let mut channel = channel();
        channel
            .enqueue_deposit(TransactionChannelNewBalance::new(OUR, TokenAmount::from(300u64), 10))
            .unwrap();
        // bypasses enqueue validation, as a corrupted snapshot would
        channel
            .deposit_transaction_queue
            .push(TransactionChannelNewBalance::new([0x99; 20], TokenAmount::one(), 11));
        let before = channel.deposit_transaction_queue().to_vec();

        assert!(matches!(
            channel.apply_deposits_up_to(20),
            Err(StateError::UnknownParticipant(_))
        ));
        assert_eq!(channel.deposit_transaction_queue(), &before[..]);
        assert_eq!(channel.our_state().contract_balance(), TokenAmount::from(100u64));
    }

    #[test]
    fn test_deposit_unknown_participant() {
        let mut channel = channel();
        assert!(matches!(
            channel.enqueue_deposit(TransactionChannelNewBalance::new(
                [0x99; 20],
                TokenAmount::one(),
                1
            )),
            Err(StateError::UnknownParticipant(_))
        ));
    }

    #[test]
    fn test_balances() {
        let mut channel = channel();
        channel
            .add_our_lock(HashTimeLock::new(TokenAmount::from(30u64), 40, [3; 32]))
            .unwrap();

        assert_eq!(channel.our_balance().unwrap(), TokenAmount::from(100u64));
        assert_eq!(channel.our_distributable().unwrap(), TokenAmount::from(70u64));
        assert_eq!(channel.partner_balance().unwrap(), TokenAmount::from(50u64));
    }

    #[test]
    fn test_withdraw_locks_through_channel() {
        let mut channel = channel();
        let ours = HashTimeLock::new(TokenAmount::from(30u64), 40, [3; 32]);
        let theirs = HashTimeLock::new(TokenAmount::from(7u64), 45, [4; 32]);
        channel.add_our_lock(ours.clone()).unwrap();
        channel.add_partner_lock(theirs.clone()).unwrap();

        assert_eq!(channel.withdraw_our_lock(ours.secrethash()).unwrap(), ours);
        assert_eq!(channel.our_state().merkletree().root(), EMPTY_MERKLE_ROOT);
        assert_eq!(channel.our_distributable().unwrap(), TokenAmount::from(100u64));

        assert!(matches!(
            channel.withdraw_partner_lock(ours.secrethash()),
            Err(StateError::LockNotFound(_))
        ));
        assert_eq!(channel.withdraw_partner_lock(theirs.secrethash()).unwrap(), theirs);
        assert!(channel.partner_state().merkletree().is_empty());
    }

    #[test]
    fn test_register_secret_both_ends() {
        let mut channel = channel();
        let secret = [5u8; 32];
        let secrethash = hash_secret(&secret);
        let lock = HashTimeLock::new(TokenAmount::from(5u64), 40, secrethash);
        channel.add_our_lock(lock.clone()).unwrap();
        channel.add_partner_lock(lock).unwrap();

        assert!(channel.register_secret(&secrethash, secret).unwrap());
        assert!(channel.our_state().is_unlocked(&secrethash));
        assert!(channel.partner_state().is_unlocked(&secrethash));
        assert!(!channel.register_secret(&hash_secret(&[6; 32]), [6; 32]).unwrap());
    }

    #[test]
    fn test_unlock_settlement() {
        let partner = Secp256k1Keypair::generate();
        let ours = NettingChannelEndState::new(OUR, TokenAmount::from(100u64));
        let theirs = NettingChannelEndState::new(partner.address(), TokenAmount::from(100u64));
        let mut channel = NettingChannelState::open(
            CHANNEL,
            TOKEN,
            ChannelConfig::default(),
            ours,
            theirs,
            TransactionExecutionStatus::success(None, 1),
        )
        .unwrap();

        let secrets: Vec<Secret> = (1..=3u8).map(|i| [i; 32]).collect();
        for secret in &secrets {
            channel
                .add_partner_lock(HashTimeLock::new(TokenAmount::from(10u64), 90, hash_secret(secret)))
                .unwrap();
        }

        let unsigned = BalanceProofUnsigned::new(
            1,
            TokenAmount::zero(),
            TokenAmount::from(30u64),
            channel.partner_state().merkletree().root(),
            CHANNEL,
        )
        .unwrap();
        channel
            .apply_partner_balance_proof(BalanceProofSigned::sign(&unsigned, &partner).unwrap())
            .unwrap();

        // learned after the partner went offline
        channel.register_secret(&hash_secret(&secrets[0]), secrets[0]).unwrap();
        channel.register_secret(&hash_secret(&secrets[2]), secrets[2]).unwrap();
        let proofs = channel.claimable_unlock_proofs().unwrap();
        assert_eq!(proofs.len(), 2);

        assert!(channel.verify_unlock_proofs(&proofs).is_err());
        channel.close_mined(50, TransactionResult::Success).unwrap();
        channel.verify_unlock_proofs(&proofs).unwrap();

        let mut forged = proofs[0].clone();
        forged.secret = [9; 32];
        assert!(matches!(
            channel.verify_unlock_proofs(&[forged]),
            Err(StateError::InvalidSecret(_))
        ));

        let mut bad_path = proofs[1].clone();
        bad_path.merkle_proof.reverse();
        bad_path.merkle_proof[0][0] ^= 0xFF;
        assert!(matches!(
            channel.verify_unlock_proofs(&[bad_path]),
            Err(StateError::InvalidMerkleProof { .. })
        ));
    }
}
