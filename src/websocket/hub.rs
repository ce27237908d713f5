//! WebSocket Connection Hub
//!
//! Manages realtime connections, their named channels and the presence
//! set. A forwarder task reads the store's change feed and routes each
//! event to every channel listening on its table; a second one relays
//! presence changes to all connections.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::messages::{PresenceKind, ServerMessage};
use crate::model::Table;
use crate::realtime::{ChangeEvent, ChangeFeed, FeedMessage, PresenceEvent, PresenceHub};

/// Unique identifier for a WebSocket connection
pub type ConnectionId = String;

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Capacity of the presence broadcast channel
    pub presence_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            presence_capacity: 256,
        }
    }
}

/// Handle for sending messages to a specific connection
pub struct ConnectionHandle {
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    /// Channel name → tables (empty means every table)
    pub channels: HashMap<String, Vec<Table>>,
    /// Presence keys tracked through this connection
    pub presence_keys: HashSet<String>,
}

impl ConnectionHandle {
    fn listening(&self, table: Table) -> impl Iterator<Item = &String> + '_ {
        self.channels
            .iter()
            .filter(move |(_, tables)| tables.is_empty() || tables.contains(&table))
            .map(|(name, _)| name)
    }
}

/// Manages all WebSocket connections and channels
pub struct ConnectionHub {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
    presence: Arc<PresenceHub>,
    config: HubConfig,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            presence: Arc::new(PresenceHub::new(config.presence_capacity)),
            config,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Forward `feed` changes and presence changes to connected clients
    pub fn start(self: &Arc<Self>, feed: &Arc<ChangeFeed>) {
        let mut channel = feed.channel("realtime-hub").subscribe();
        let hub = Arc::clone(self);
        let changes = tokio::spawn(async move {
            while let Some(message) = channel.recv().await {
                match message {
                    FeedMessage::Change(event) => {
                        hub.dispatch(&event).await;
                    }
                    FeedMessage::Lagged(skipped) => {
                        tracing::warn!(skipped, "Realtime hub fell behind the change feed");
                        hub.broadcast(ServerMessage::error(format!(
                            "{} change events were dropped; reload to resync",
                            skipped
                        )))
                        .await;
                    }
                }
            }
        });

        let mut presence_rx = self.presence.subscribe();
        let hub = Arc::clone(self);
        let presence = tokio::spawn(async move {
            loop {
                let event = match presence_rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => PresenceEvent::Sync {
                        count: hub.presence.count(),
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let count = hub.presence.count();
                let message = match event {
                    PresenceEvent::Sync { count } => ServerMessage::Presence {
                        event: PresenceKind::Sync,
                        key: None,
                        count,
                    },
                    PresenceEvent::Join { key } => ServerMessage::Presence {
                        event: PresenceKind::Join,
                        key: Some(key),
                        count,
                    },
                    PresenceEvent::Leave { key } => ServerMessage::Presence {
                        event: PresenceKind::Leave,
                        key: Some(key),
                        count,
                    },
                    PresenceEvent::Disconnected => continue,
                };
                hub.broadcast(message).await;
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(changes);
            tasks.push(presence);
        }
        tracing::info!("Realtime hub started");
    }

    /// Stop the forwarder tasks
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    /// Register a new WebSocket connection
    ///
    /// Returns the connection ID on success, or an error if the connection
    /// limit has been reached.
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<ConnectionId, HubError> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        connections.insert(
            id.clone(),
            ConnectionHandle {
                sender,
                channels: HashMap::new(),
                presence_keys: HashSet::new(),
            },
        );

        tracing::info!(connection_id = %id, "WebSocket connected");
        Ok(id)
    }

    /// Unregister a connection, dropping its channels and presence keys
    pub async fn unregister(&self, id: &str) {
        let handle = self.connections.write().await.remove(id);

        if let Some(handle) = handle {
            for key in &handle.presence_keys {
                self.presence.leave(key);
            }
            tracing::info!(
                connection_id = %id,
                channels = handle.channels.len(),
                "WebSocket disconnected"
            );
        }
    }

    /// Open or replace a named channel; returns the effective tables
    pub async fn subscribe(
        &self,
        id: &str,
        channel: &str,
        tables: Vec<Table>,
    ) -> Result<Vec<Table>, HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections
            .get_mut(id)
            .ok_or(HubError::ConnectionNotFound)?;

        let effective = if tables.is_empty() {
            Table::ALL.to_vec()
        } else {
            tables.clone()
        };
        handle.channels.insert(channel.to_string(), tables);

        tracing::debug!(
            connection_id = %id,
            channel = %channel,
            tables = ?effective,
            "Channel subscribed"
        );
        Ok(effective)
    }

    /// Close a named channel; returns whether it was open
    pub async fn unsubscribe(&self, id: &str, channel: &str) -> Result<bool, HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections
            .get_mut(id)
            .ok_or(HubError::ConnectionNotFound)?;

        let removed = handle.channels.remove(channel).is_some();
        tracing::debug!(connection_id = %id, channel = %channel, removed, "Channel unsubscribed");
        Ok(removed)
    }

    pub async fn track(&self, id: &str, key: &str, payload: Value) -> Result<usize, HubError> {
        {
            let mut connections = self.connections.write().await;
            let handle = connections
                .get_mut(id)
                .ok_or(HubError::ConnectionNotFound)?;
            handle.presence_keys.insert(key.to_string());
        }
        Ok(self.presence.join(key, payload))
    }

    pub async fn untrack(&self, id: &str, key: &str) -> Result<bool, HubError> {
        {
            let mut connections = self.connections.write().await;
            let handle = connections
                .get_mut(id)
                .ok_or(HubError::ConnectionNotFound)?;
            handle.presence_keys.remove(key);
        }
        Ok(self.presence.leave(key))
    }

    /// Send a change to every channel listening on its table
    ///
    /// Returns the number of messages queued.
    pub async fn dispatch(&self, event: &ChangeEvent) -> usize {
        let connections = self.connections.read().await;
        let mut sent = 0;

        for handle in connections.values() {
            for channel in handle.listening(event.table) {
                let message = ServerMessage::Change {
                    channel: channel.clone(),
                    event: event.clone(),
                };
                if handle.sender.send(message).is_ok() {
                    sent += 1;
                }
            }
        }

        if sent > 0 {
            tracing::trace!(table = %event.table, messages = sent, "Dispatched change");
        }
        sent
    }

    /// Send a message to every connection
    pub async fn broadcast(&self, message: ServerMessage) {
        let connections = self.connections.read().await;
        for handle in connections.values() {
            let _ = handle.sender.send(message.clone());
        }
    }

    /// Send a message directly to a specific connection
    pub async fn send_to(&self, id: &str, message: ServerMessage) -> Result<(), HubError> {
        let connections = self.connections.read().await;
        let handle = connections.get(id).ok_or(HubError::ConnectionNotFound)?;

        handle
            .sender
            .send(message)
            .map_err(|_| HubError::SendFailed)
    }

    pub fn presence(&self) -> &Arc<PresenceHub> {
        &self.presence
    }

    /// Get the current connection count
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Open channels across all connections
    pub async fn channel_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .map(|h| h.channels.len())
            .sum()
    }
}

impl Drop for ConnectionHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Errors that can occur in the connection hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Failed to send message")]
    SendFailed,
}
