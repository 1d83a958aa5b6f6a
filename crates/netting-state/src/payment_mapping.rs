//! Secrethash to transfer-task mapping.
//!
//! Every in-flight transfer is owned by exactly one task, keyed by the
//! secrethash of its locks. A mediated transfer spanning several channels is
//! still a single task.

use crate::error::{StateError, StateResult};
use crate::types::{pex, Address, ChannelId, Keccak256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Opaque handle to a task state owned by the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskStateId(pub u64);

impl fmt::Display for TaskStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// The role the local node plays in a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferTask {
    /// We started the payment.
    Initiator {
        payment_network_id: Address,
        token_address: Address,
        manager_state: TaskStateId,
    },
    /// We forward the payment between two channels.
    Mediator {
        payment_network_id: Address,
        token_address: Address,
        mediator_state: TaskStateId,
    },
    /// We are the payee, paid through `channel_id`.
    Target {
        payment_network_id: Address,
        token_address: Address,
        channel_id: ChannelId,
        target_state: TaskStateId,
    },
}

impl TransferTask {
    /// Payment network the task belongs to.
    pub fn payment_network_id(&self) -> &Address {
        match self {
            TransferTask::Initiator {
                payment_network_id, ..
            }
            | TransferTask::Mediator {
                payment_network_id, ..
            }
            | TransferTask::Target {
                payment_network_id, ..
            } => payment_network_id,
        }
    }

    /// Token being transferred.
    pub fn token_address(&self) -> &Address {
        match self {
            TransferTask::Initiator { token_address, .. }
            | TransferTask::Mediator { token_address, .. }
            | TransferTask::Target { token_address, .. } => token_address,
        }
    }

    /// Handle of the role-specific state.
    pub fn state_id(&self) -> TaskStateId {
        match self {
            TransferTask::Initiator { manager_state, .. } => *manager_state,
            TransferTask::Mediator { mediator_state, .. } => *mediator_state,
            TransferTask::Target { target_state, .. } => *target_state,
        }
    }

    fn role(&self) -> &'static str {
        match self {
            TransferTask::Initiator { .. } => "initiator",
            TransferTask::Mediator { .. } => "mediator",
            TransferTask::Target { .. } => "target",
        }
    }
}

impl fmt::Display for TransferTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}Task network:{} token:{} state:{}>",
            self.role(),
            pex(self.payment_network_id()),
            pex(self.token_address()),
            self.state_id()
        )
    }
}

/// Global map from secrethash to the transfer task handling it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMappingState {
    secrethashes_to_task: HashMap<Keccak256, TransferTask>,
}

impl PaymentMappingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task handling `secrethash`, if any.
    pub fn dispatch(&self, secrethash: &Keccak256) -> Option<&TransferTask> {
        self.secrethashes_to_task.get(secrethash)
    }

    /// Register the task for `secrethash`.
    ///
    /// # Errors
    /// Returns [`StateError::DuplicateTask`] if a task is already registered;
    /// the existing task is kept.
    pub fn register(&mut self, secrethash: Keccak256, task: TransferTask) -> StateResult<()> {
        if self.secrethashes_to_task.contains_key(&secrethash) {
            warn!("Task for secrethash {} already registered", pex(&secrethash));
            return Err(StateError::DuplicateTask(secrethash));
        }

        debug!("Registered {} for secrethash {}", task, pex(&secrethash));
        self.secrethashes_to_task.insert(secrethash, task);
        Ok(())
    }

    /// Drop the task for a finished transfer.
    pub fn remove(&mut self, secrethash: &Keccak256) -> Option<TransferTask> {
        self.secrethashes_to_task.remove(secrethash)
    }

    pub fn len(&self) -> usize {
        self.secrethashes_to_task.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrethashes_to_task.is_empty()
    }
}
