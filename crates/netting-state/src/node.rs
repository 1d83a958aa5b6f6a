//! Node-wide state: the aggregate root of the state model.
//!
//! [`NodeState`] owns every payment network, the reachability table, the
//! outbound message queues and the [`PaymentMappingState`]. The message
//! identifier generator is the only part drawn from through a shared
//! reference; it serializes draws behind a mutex so identifiers stay a single
//! deterministic sequence per seed.

use crate::channel::NettingChannelState;
use crate::error::{StateError, StateResult};
use crate::network::{NetworkState, PaymentNetworkState};
use crate::payment_mapping::PaymentMappingState;
use crate::types::{pex, Address, BlockNumber, ChannelId, MessageId};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, trace};

struct GeneratorInner {
    rng: ChaCha12Rng,
    draws: u64,
}

/// Seeded source of message identifiers.
///
/// Persists as `(seed, draws, word_pos)`; restoring seeks the keystream to
/// `word_pos` so the sequence continues where it stopped.
#[derive(Serialize, Deserialize)]
#[serde(from = "GeneratorSnapshot", into = "GeneratorSnapshot")]
pub struct MessageIdGenerator {
    seed: u64,
    inner: Mutex<GeneratorInner>,
}

#[derive(Serialize, Deserialize)]
struct GeneratorSnapshot {
    seed: u64,
    draws: u64,
    word_pos: u128,
}

impl MessageIdGenerator {
    pub fn new(seed: u64) -> Self {
        Self::restore(GeneratorSnapshot {
            seed,
            draws: 0,
            word_pos: 0,
        })
    }

    fn restore(snapshot: GeneratorSnapshot) -> Self {
        let mut rng = ChaCha12Rng::seed_from_u64(snapshot.seed);
        rng.set_word_pos(snapshot.word_pos);
        Self {
            seed: snapshot.seed,
            inner: Mutex::new(GeneratorInner {
                rng,
                draws: snapshot.draws,
            }),
        }
    }

    /// Draw the next identifier.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> MessageId {
        let mut inner = self.inner.lock();
        inner.draws += 1;
        inner.rng.gen()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Identifiers drawn so far.
    pub fn draws(&self) -> u64 {
        self.inner.lock().draws
    }

    fn snapshot(&self) -> GeneratorSnapshot {
        let inner = self.inner.lock();
        GeneratorSnapshot {
            seed: self.seed,
            draws: inner.draws,
            word_pos: inner.rng.get_word_pos(),
        }
    }
}

impl From<GeneratorSnapshot> for MessageIdGenerator {
    fn from(snapshot: GeneratorSnapshot) -> Self {
        MessageIdGenerator::restore(snapshot)
    }
}

impl From<MessageIdGenerator> for GeneratorSnapshot {
    fn from(generator: MessageIdGenerator) -> Self {
        generator.snapshot()
    }
}

impl Clone for MessageIdGenerator {
    fn clone(&self) -> Self {
        Self::restore(self.snapshot())
    }
}

impl PartialEq for MessageIdGenerator {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed && self.draws() == other.draws()
    }
}

impl Eq for MessageIdGenerator {}

impl fmt::Debug for MessageIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageIdGenerator")
            .field("seed", &self.seed)
            .field("draws", &self.draws())
            .finish()
    }
}

/// Key of an outbound message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId {
    pub recipient: Address,
    pub channel_id: ChannelId,
}

impl QueueId {
    pub fn new(recipient: Address, channel_id: ChannelId) -> Self {
        Self {
            recipient,
            channel_id,
        }
    }
}

/// A message waiting for delivery to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    pub recipient: Address,
    pub channel_id: ChannelId,
    pub message_identifier: MessageId,
    /// Encoded message, opaque to the state model.
    pub payload: Vec<u8>,
}

impl fmt::Display for SendMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<SendMessage id:{} recipient:{} channel:{} len:{}>",
            self.message_identifier,
            pex(&self.recipient),
            pex(&self.channel_id),
            self.payload.len()
        )
    }
}

/// Umbrella object that stores the per-node state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    message_ids: MessageIdGenerator,
    block_number: BlockNumber,
    identifiers_to_paymentnetworks: HashMap<Address, PaymentNetworkState>,
    nodeaddresses_to_networkstates: HashMap<Address, NetworkState>,
    queueids_to_queues: HashMap<QueueId, Vec<SendMessage>>,
    payment_mapping: PaymentMappingState,
}

impl NodeState {
    /// Create the node state at `block_number`, seeding the identifier
    /// generator once.
    pub fn new(seed: u64, block_number: BlockNumber) -> Self {
        Self {
            message_ids: MessageIdGenerator::new(seed),
            block_number,
            identifiers_to_paymentnetworks: HashMap::new(),
            nodeaddresses_to_networkstates: HashMap::new(),
            queueids_to_queues: HashMap::new(),
            payment_mapping: PaymentMappingState::new(),
        }
    }

    /// Draw a fresh message identifier.
    pub fn next_message_identifier(&self) -> MessageId {
        self.message_ids.next()
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_number
    }

    /// Advance to a newly observed block.
    ///
    /// # Errors
    /// Returns [`StateError::BlockNumberRegression`] if `block_number` is
    /// below the current one.
    pub fn update_block_number(&mut self, block_number: BlockNumber) -> StateResult<()> {
        if block_number < self.block_number {
            return Err(StateError::BlockNumberRegression {
                current: self.block_number,
                provided: block_number,
            });
        }
        trace!("New block {}", block_number);
        self.block_number = block_number;
        Ok(())
    }

    /// Register a payment network.
    pub fn add_payment_network(&mut self, payment_network: PaymentNetworkState) -> StateResult<()> {
        let id = *payment_network.address();
        if self.identifiers_to_paymentnetworks.contains_key(&id) {
            return Err(StateError::DuplicateIdentifier(id.to_vec()));
        }
        debug!("Added payment network {}", pex(&id));
        self.identifiers_to_paymentnetworks.insert(id, payment_network);
        Ok(())
    }

    pub fn payment_network(&self, id: &Address) -> Option<&PaymentNetworkState> {
        self.identifiers_to_paymentnetworks.get(id)
    }

    pub fn payment_network_mut(&mut self, id: &Address) -> Option<&mut PaymentNetworkState> {
        self.identifiers_to_paymentnetworks.get_mut(id)
    }

    /// Find a channel anywhere in the node.
    pub fn channel_by_id(&self, channel_id: &ChannelId) -> Option<&NettingChannelState> {
        self.identifiers_to_paymentnetworks
            .values()
            .find_map(|network| network.channel_by_id(channel_id))
    }

    pub fn channel_by_id_mut(&mut self, channel_id: &ChannelId) -> Option<&mut NettingChannelState> {
        self.identifiers_to_paymentnetworks
            .values_mut()
            .find_map(|network| network.channel_by_id_mut(channel_id))
    }

    /// Record a peer's reachability.
    pub fn set_network_state(&mut self, address: Address, state: NetworkState) {
        let previous = self.nodeaddresses_to_networkstates.insert(address, state);
        if previous != Some(state) {
            debug!("Node {} is now {}", pex(&address), state);
        }
    }

    /// Last known reachability; `Unknown` for unseen peers.
    pub fn network_state(&self, address: &Address) -> NetworkState {
        self.nodeaddresses_to_networkstates
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// Queue a message for `recipient` on `channel_id`, drawing its identifier.
    pub fn enqueue_message(
        &mut self,
        recipient: Address,
        channel_id: ChannelId,
        payload: Vec<u8>,
    ) -> MessageId {
        let message_identifier = self.next_message_identifier();
        let message = SendMessage {
            recipient,
            channel_id,
            message_identifier,
            payload,
        };
        trace!("Queued {}", message);
        self.queueids_to_queues
            .entry(QueueId::new(recipient, channel_id))
            .or_default()
            .push(message);
        message_identifier
    }

    /// Pending messages of a queue, oldest first.
    pub fn queue(&self, queue_id: &QueueId) -> &[SendMessage] {
        self.queueids_to_queues
            .get(queue_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Take every pending message of a queue.
    pub fn drain_queue(&mut self, queue_id: &QueueId) -> Vec<SendMessage> {
        self.queueids_to_queues.remove(queue_id).unwrap_or_default()
    }

    /// Drop a delivered message. Returns whether it was queued.
    pub fn acknowledge_message(&mut self, queue_id: &QueueId, message_identifier: MessageId) -> bool {
        let Some(queue) = self.queueids_to_queues.get_mut(queue_id) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|message| message.message_identifier != message_identifier);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.queueids_to_queues.remove(queue_id);
        }
        removed
    }

    pub fn payment_mapping(&self) -> &PaymentMappingState {
        &self.payment_mapping
    }

    pub fn payment_mapping_mut(&mut self) -> &mut PaymentMappingState {
        &mut self.payment_mapping
    }
}
