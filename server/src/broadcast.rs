//! Best-effort fan-out of server events
//!
//! Delivery means handing the event to a connection's outbound queue. A
//! connection whose writer has gone away is skipped; nothing is retried or
//! replayed.

use crate::client_manager::{ClientManager, ConnectionId};
use log::debug;
use shared::ServerEvent;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Audience of one outbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    All(ServerEvent),
    One(ConnectionId, ServerEvent),
}

#[derive(Clone)]
pub struct EventBroadcaster {
    clients: Arc<RwLock<ClientManager>>,
}

impl EventBroadcaster {
    pub fn new(clients: Arc<RwLock<ClientManager>>) -> Self {
        Self { clients }
    }

    /// Returns how many connections accepted the event
    pub async fn to_all(&self, event: &ServerEvent) -> usize {
        let senders = {
            let clients = self.clients.read().await;
            clients.senders()
        };

        let mut delivered = 0;
        for (client_id, sender) in senders {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("Client {} outbound queue closed, skipping", client_id);
            }
        }
        delivered
    }

    pub async fn to_one(&self, client_id: ConnectionId, event: &ServerEvent) -> bool {
        let sender = {
            let clients = self.clients.read().await;
            clients.sender(client_id)
        };

        match sender {
            Some(sender) if sender.send(event.clone()).is_ok() => true,
            _ => {
                debug!("Client {} not reachable, dropping {:?}", client_id, event);
                false
            }
        }
    }

    /// Sends dispatches in order
    pub async fn deliver(&self, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            match dispatch {
                Dispatch::All(event) => {
                    self.to_all(&event).await;
                }
                Dispatch::One(client_id, event) => {
                    self.to_one(client_id, &event).await;
                }
            }
        }
    }
}
