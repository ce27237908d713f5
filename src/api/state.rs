//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::store::{Backend, SqliteStore};
use crate::websocket::ConnectionHub;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Row store serving REST and the change feed
    pub store: Arc<SqliteStore>,
    /// Realtime connection hub
    pub hub: Arc<ConnectionHub>,
    pub config: Arc<Config>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<SqliteStore>, config: Config) -> Self {
        Self {
            store,
            hub: Arc::new(ConnectionHub::new(config.hub_config())),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Start forwarding the store's changes to WebSocket clients
    pub fn start_realtime(&self) {
        self.hub.start(&self.store.feed());
    }

    pub fn anon_key(&self) -> &str {
        &self.config.backend.anon_key
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
