//! Shared server state.

use ssewire_core::config::ServerConfig;
use tokio_util::sync::CancellationToken;

use crate::hub::Hub;
use crate::upgrade::Upgrader;

/// Chunks a streaming response body may hold before writes wait on the peer.
const DEFAULT_BODY_CAPACITY: usize = 32;

/// State shared by every request handler.
pub struct ServerState {
    pub upgrader: Upgrader,
    pub hub: Hub,
    /// Parent of every request context; cancelled when the server stops.
    pub shutdown: CancellationToken,
    pub body_capacity: usize,
}

impl ServerState {
    pub fn new(upgrader: Upgrader) -> Self {
        Self {
            upgrader,
            hub: Hub::new(),
            shutdown: CancellationToken::new(),
            body_capacity: DEFAULT_BODY_CAPACITY,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(Upgrader::from_config(config))
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(Upgrader::default())
    }
}
