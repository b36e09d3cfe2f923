//! Connection roster for the mission server
//!
//! This module tracks every live WebSocket connection:
//! - Connection id assignment and capacity enforcement
//! - The outbound channel feeding each connection's writer task
//! - Per-connection activity counters for diagnostics
//!
//! Mission state is never stored here; a connection is only an address for
//! events. Participant facts live in the ledger.

use log::info;
use shared::ServerEvent;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

pub type ConnectionId = u32;

/// Queue drained by a connection's writer task
pub type OutboundSender = mpsc::UnboundedSender<ServerEvent>;

/// A connected participant or admin console
#[derive(Debug)]
pub struct Client {
    /// Unique connection identifier assigned by the server
    pub id: ConnectionId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// Last time an inbound event arrived
    pub last_seen: Instant,
    /// Inbound events received so far
    pub events_received: u64,
    sender: OutboundSender,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: OutboundSender) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            connected_at: now,
            last_seen: now,
            events_received: 0,
            sender,
        }
    }

    /// Records one inbound event
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.events_received += 1;
    }

    pub fn sender(&self) -> &OutboundSender {
        &self.sender
    }
}

/// Manages all connected clients
///
/// Shared between the accept loop (which adds and removes connections) and
/// the event broadcaster (which reads the outbound senders).
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<ConnectionId, Client>,
    /// Next available client ID for new connections
    next_client_id: ConnectionId,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new connection. Returns `None` when the server is full.
    pub fn add_client(&mut self, addr: SocketAddr, sender: OutboundSender) -> Option<ConnectionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, sender));

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &ConnectionId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected after {} events ({:.1}s)",
                client.id,
                client.events_received,
                client.connected_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    pub fn touch(&mut self, client_id: ConnectionId) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
            true
        } else {
            false
        }
    }

    pub fn sender(&self, client_id: ConnectionId) -> Option<OutboundSender> {
        self.clients
            .get(&client_id)
            .map(|client| client.sender.clone())
    }

    /// Snapshot of every outbound sender, for fan-out
    pub fn senders(&self) -> Vec<(ConnectionId, OutboundSender)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.sender.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
