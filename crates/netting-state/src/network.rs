//! Payment networks, token networks and the channel graph.
//!
//! The containment tree is `PaymentNetworkState -> TokenNetworkState ->
//! NettingChannelState`. Each level owns its children; lookups by secondary
//! key (token address, partner address) go through index maps.

use crate::channel::NettingChannelState;
use crate::error::{StateError, StateResult};
use crate::types::{pex, Address, ChannelId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

/// Reachability of a peer, as reported by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkState {
    #[default]
    Unknown,
    Unreachable,
    Reachable,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkState::Unknown => write!(f, "unknown"),
            NetworkState::Unreachable => write!(f, "unreachable"),
            NetworkState::Reachable => write!(f, "reachable"),
        }
    }
}

/// One hop of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteState {
    /// Next node on the path.
    pub node_address: Address,
    /// Channel used to reach it.
    pub channel_id: ChannelId,
}

impl RouteState {
    pub fn new(node_address: Address, channel_id: ChannelId) -> Self {
        Self {
            node_address,
            channel_id,
        }
    }
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<RouteState hop:{} channel:{}>",
            pex(&self.node_address),
            pex(&self.channel_id)
        )
    }
}

/// Known channels of a token network, as an undirected graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenNetworkGraphState {
    channel_edges: HashMap<ChannelId, (Address, Address)>,
    adjacency: HashMap<Address, BTreeSet<Address>>,
}

impl TokenNetworkGraphState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a channel between two participants.
    pub fn add_edge(&mut self, channel_id: ChannelId, first: Address, second: Address) {
        self.channel_edges.insert(channel_id, (first, second));
        self.adjacency.entry(first).or_default().insert(second);
        self.adjacency.entry(second).or_default().insert(first);
    }

    /// Forget a channel. The participants stay adjacent while another
    /// channel still links them.
    pub fn remove_edge(&mut self, channel_id: &ChannelId) -> bool {
        let Some((first, second)) = self.channel_edges.remove(channel_id) else {
            return false;
        };

        let still_linked = self
            .channel_edges
            .values()
            .any(|&(a, b)| (a == first && b == second) || (a == second && b == first));
        if !still_linked {
            for (from, to) in [(first, second), (second, first)] {
                if let Some(neighbours) = self.adjacency.get_mut(&from) {
                    neighbours.remove(&to);
                    if neighbours.is_empty() {
                        self.adjacency.remove(&from);
                    }
                }
            }
        }
        true
    }

    /// Participants sharing a channel with `address`, in address order.
    pub fn neighbours(&self, address: &Address) -> Vec<Address> {
        self.adjacency
            .get(address)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of channels in the graph.
    pub fn channel_count(&self) -> usize {
        self.channel_edges.len()
    }
}

/// Channels of one token network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenNetworkState {
    address: Address,
    token_address: Address,
    network_graph: TokenNetworkGraphState,
    channelidentifiers_to_channels: HashMap<ChannelId, NettingChannelState>,
    partneraddresses_to_channelidentifiers: HashMap<Address, Vec<ChannelId>>,
}

impl TokenNetworkState {
    pub fn new(address: Address, token_address: Address) -> Self {
        Self {
            address,
            token_address,
            network_graph: TokenNetworkGraphState::new(),
            channelidentifiers_to_channels: HashMap::new(),
            partneraddresses_to_channelidentifiers: HashMap::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn token_address(&self) -> &Address {
        &self.token_address
    }

    pub fn network_graph(&self) -> &TokenNetworkGraphState {
        &self.network_graph
    }

    pub fn network_graph_mut(&mut self) -> &mut TokenNetworkGraphState {
        &mut self.network_graph
    }

    /// Add a channel the local node participates in.
    ///
    /// # Errors
    /// * [`StateError::DuplicateIdentifier`] if the channel is already known
    /// * [`StateError::InvalidState`] if the channel is for another token
    pub fn add_channel(&mut self, channel: NettingChannelState) -> StateResult<()> {
        let channel_id = *channel.identifier();
        if self.channelidentifiers_to_channels.contains_key(&channel_id) {
            return Err(StateError::DuplicateIdentifier(channel_id.to_vec()));
        }
        if channel.token_address() != &self.token_address {
            return Err(StateError::InvalidState {
                expected: "channel for this token network's token",
                actual: hex::encode(channel.token_address()),
            });
        }

        let ours = *channel.our_state().address();
        let partner = *channel.partner_state().address();
        self.network_graph.add_edge(channel_id, ours, partner);
        self.partneraddresses_to_channelidentifiers
            .entry(partner)
            .or_default()
            .push(channel_id);
        self.channelidentifiers_to_channels.insert(channel_id, channel);

        debug!(
            "Token network {} added channel {} with {}",
            pex(&self.address),
            pex(&channel_id),
            pex(&partner)
        );
        Ok(())
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Option<&NettingChannelState> {
        self.channelidentifiers_to_channels.get(channel_id)
    }

    pub fn channel_mut(&mut self, channel_id: &ChannelId) -> Option<&mut NettingChannelState> {
        self.channelidentifiers_to_channels.get_mut(channel_id)
    }

    /// The newest channel with `partner` that can still transfer, falling
    /// back to the newest channel of any status.
    pub fn channel_for_partner(&self, partner: &Address) -> Option<&NettingChannelState> {
        let ids = self.partneraddresses_to_channelidentifiers.get(partner)?;
        let channels: Vec<&NettingChannelState> = ids
            .iter()
            .rev()
            .filter_map(|id| self.channelidentifiers_to_channels.get(id))
            .collect();

        channels
            .iter()
            .find(|channel| channel.can_transfer())
            .or_else(|| channels.first())
            .copied()
    }

    /// All channels, in no particular order.
    pub fn channels(&self) -> impl Iterator<Item = &NettingChannelState> {
        self.channelidentifiers_to_channels.values()
    }
}

/// A payment network (token network registry) and its token networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNetworkState {
    address: Address,
    tokenidentifiers_to_tokennetworks: HashMap<Address, TokenNetworkState>,
    tokenaddresses_to_tokenidentifiers: HashMap<Address, Address>,
}

impl PaymentNetworkState {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            tokenidentifiers_to_tokennetworks: HashMap::new(),
            tokenaddresses_to_tokenidentifiers: HashMap::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Register a token network.
    ///
    /// # Errors
    /// Returns [`StateError::DuplicateIdentifier`] if the network or its token
    /// is already registered.
    pub fn add_token_network(&mut self, token_network: TokenNetworkState) -> StateResult<()> {
        let id = *token_network.address();
        let token = *token_network.token_address();
        if self.tokenidentifiers_to_tokennetworks.contains_key(&id) {
            return Err(StateError::DuplicateIdentifier(id.to_vec()));
        }
        if self.tokenaddresses_to_tokenidentifiers.contains_key(&token) {
            return Err(StateError::DuplicateIdentifier(token.to_vec()));
        }

        self.tokenaddresses_to_tokenidentifiers.insert(token, id);
        self.tokenidentifiers_to_tokennetworks.insert(id, token_network);
        debug!("Payment network {} added token {}", pex(&self.address), pex(&token));
        Ok(())
    }

    pub fn token_network(&self, id: &Address) -> Option<&TokenNetworkState> {
        self.tokenidentifiers_to_tokennetworks.get(id)
    }

    pub fn token_network_mut(&mut self, id: &Address) -> Option<&mut TokenNetworkState> {
        self.tokenidentifiers_to_tokennetworks.get_mut(id)
    }

    pub fn token_network_by_token(&self, token_address: &Address) -> Option<&TokenNetworkState> {
        self.tokenaddresses_to_tokenidentifiers
            .get(token_address)
            .and_then(|id| self.tokenidentifiers_to_tokennetworks.get(id))
    }

    pub fn token_networks(&self) -> impl Iterator<Item = &TokenNetworkState> {
        self.tokenidentifiers_to_tokennetworks.values()
    }

    /// Find a channel in any of this network's token networks.
    pub fn channel_by_id(&self, channel_id: &ChannelId) -> Option<&NettingChannelState> {
        self.token_networks()
            .find_map(|token_network| token_network.channel(channel_id))
    }

    pub fn channel_by_id_mut(&mut self, channel_id: &ChannelId) -> Option<&mut NettingChannelState> {
        self.tokenidentifiers_to_tokennetworks
            .values_mut()
            .find_map(|token_network| token_network.channel_mut(channel_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, TransactionExecutionStatus, TransactionResult};
    use crate::end_state::NettingChannelEndState;
    use crate::types::TokenAmount;

    const OUR: Address = [0x01; 20];
    const TOKEN: Address = [0x70; 20];

    fn channel(id: u8, partner: u8) -> NettingChannelState {
        NettingChannelState::open(
            [id; 20],
            TOKEN,
            ChannelConfig::default(),
            NettingChannelEndState::new(OUR, TokenAmount::from(10u64)),
            NettingChannelEndState::new([partner; 20], TokenAmount::zero()),
            TransactionExecutionStatus::success(None, 1),
        )
        .unwrap()
    }

    #[test]
    fn test_add_and_lookup_channel() {
        let mut network = TokenNetworkState::new([0xA0; 20], TOKEN);
        network.add_channel(channel(0xC1, 0x02)).unwrap();

        assert!(network.channel(&[0xC1; 20]).is_some());
        assert_eq!(
            network.channel_for_partner(&[0x02; 20]).unwrap().identifier(),
            &[0xC1; 20]
        );
        assert_eq!(network.network_graph().neighbours(&OUR), vec![[0x02; 20]]);
        assert!(matches!(
            network.add_channel(channel(0xC1, 0x03)),
            Err(StateError::DuplicateIdentifier(_))
        ));
    }

    #[test]
    fn test_channel_for_partner_prefers_open() {
        let mut network = TokenNetworkState::new([0xA0; 20], TOKEN);
        network.add_channel(channel(0xC1, 0x02)).unwrap();
        network.add_channel(channel(0xC2, 0x02)).unwrap();

        network
            .channel_mut(&[0xC2; 20])
            .unwrap()
            .close_mined(5, TransactionResult::Success)
            .unwrap();
        assert_eq!(
            network.channel_for_partner(&[0x02; 20]).unwrap().identifier(),
            &[0xC1; 20]
        );

        network
            .channel_mut(&[0xC1; 20])
            .unwrap()
            .mark_unusable(6)
            .unwrap();
        assert_eq!(
            network.channel_for_partner(&[0x02; 20]).unwrap().identifier(),
            &[0xC2; 20]
        );
        assert!(network.channel_for_partner(&[0x09; 20]).is_none());
    }

    #[test]
    fn test_token_mismatch_rejected() {
        let mut network = TokenNetworkState::new([0xA0; 20], [0x71; 20]);
        assert!(matches!(
            network.add_channel(channel(0xC1, 0x02)),
            Err(StateError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_graph_edges() {
        let mut graph = TokenNetworkGraphState::new();
        graph.add_edge([1; 20], [0xA; 20], [0xB; 20]);
        graph.add_edge([2; 20], [0xA; 20], [0xB; 20]);
        graph.add_edge([3; 20], [0xA; 20], [0xC; 20]);
        assert_eq!(graph.neighbours(&[0xA; 20]), vec![[0xB; 20], [0xC; 20]]);

        assert!(graph.remove_edge(&[1; 20]));
        assert_eq!(graph.neighbours(&[0xB; 20]), vec![[0xA; 20]]);
        assert!(graph.remove_edge(&[2; 20]));
        assert!(graph.neighbours(&[0xB; 20]).is_empty());
        assert!(!graph.remove_edge(&[2; 20]));
        assert_eq!(graph.channel_count(), 1);
    }

    #[test]
    fn test_payment_network_registry() {
        let mut payment_network = PaymentNetworkState::new([0xEE; 20]);
        let mut token_network = TokenNetworkState::new([0xA0; 20], TOKEN);
        token_network.add_channel(channel(0xC1, 0x02)).unwrap();
        payment_network.add_token_network(token_network).unwrap();

        assert!(payment_network.token_network(&[0xA0; 20]).is_some());
        assert_eq!(
            payment_network.token_network_by_token(&TOKEN).unwrap().address(),
            &[0xA0; 20]
        );
        assert!(payment_network.channel_by_id(&[0xC1; 20]).is_some());
        assert!(payment_network.channel_by_id_mut(&[0xC9; 20]).is_none());

        let same_token = TokenNetworkState::new([0xA1; 20], TOKEN);
        assert!(matches!(
            payment_network.add_token_network(same_token),
            Err(StateError::DuplicateIdentifier(_))
        ));
    }

    #[test]
    fn test_route_display() {
        let route = RouteState::new([0xAB; 20], [0xCD; 20]);
        assert_eq!(route.to_string(), "<RouteState hop:abababab channel:cdcdcdcd>");
    }
}
