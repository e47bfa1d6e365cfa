//! Fan-out of messages to every live connection.

use std::collections::HashMap;

use ssewire_core::error::SseError;
use ssewire_core::protocol::Message;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::connection::Connection;

#[derive(Debug, Default)]
pub struct Hub {
    connections: RwLock<HashMap<String, Connection>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn: Connection) {
        let mut connections = self.connections.write().await;
        connections.insert(conn.id().to_string(), conn);
        debug!(total = connections.len(), "Connection registered");
    }

    pub async fn remove(&self, conn_id: &str) -> Option<Connection> {
        self.connections.write().await.remove(conn_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Queue `message` on every open connection. Returns how many accepted it.
    ///
    /// Delivery never waits: a connection whose queue is full misses this
    /// message. Closed connections are dropped from the hub.
    pub async fn broadcast(&self, message: Message) -> usize {
        let mut sent = 0;
        let mut stale = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, conn) in connections.iter() {
                match conn.try_send(message.clone()) {
                    Ok(()) => sent += 1,
                    Err(SseError::QueueFull) => {
                        warn!(conn_id = %id, "Connection queue full, dropping message");
                    }
                    Err(_) => stale.push(id.clone()),
                }
            }
        }

        if !stale.is_empty() {
            let mut connections = self.connections.write().await;
            for id in &stale {
                connections.remove(id);
            }
        }

        debug!(event = message.event.as_deref().unwrap_or(""), sent, pruned = stale.len(), "Broadcast message");
        sent
    }

    /// Stop every connection and empty the hub.
    pub async fn shutdown_all(&self) {
        let mut connections = self.connections.write().await;
        for conn in connections.values() {
            conn.shutdown();
        }
        connections.clear();
    }
}
