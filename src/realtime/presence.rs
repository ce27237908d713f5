//! Presence and connection health
//!
//! [`PresenceHub`] keeps the set of tracked keys for the realtime server
//! and doubles as an in-process transport. [`ConnectionMonitor`] drives the
//! "Live Updates / Offline" indicator from presence traffic on any
//! [`PresenceTransport`]. The indicator is cosmetic: it never gates a
//! read or write.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::BridgeError;

/// Presence traffic seen by a participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Sync { count: usize },
    Join { key: String },
    Leave { key: String },
    /// The underlying connection dropped or errored
    Disconnected,
}

/// Something a client can announce itself on
#[async_trait]
pub trait PresenceTransport: Send + Sync {
    /// Announce (or refresh) a presence key
    async fn track(&self, key: &str, payload: Value) -> Result<(), BridgeError>;

    async fn untrack(&self, key: &str) -> Result<(), BridgeError>;

    fn events(&self) -> broadcast::Receiver<PresenceEvent>;
}

/// Tracked presence keys and their payloads
pub struct PresenceHub {
    members: Mutex<HashMap<String, Value>>,
    tx: broadcast::Sender<PresenceEvent>,
}

impl PresenceHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            members: Mutex::new(HashMap::new()),
            tx,
        }
    }

    /// Track a key, emitting `join` for new keys and `sync` always
    pub fn join(&self, key: &str, payload: Value) -> usize {
        let (is_new, count) = match self.members.lock() {
            Ok(mut members) => {
                let is_new = members.insert(key.to_string(), payload).is_none();
                (is_new, members.len())
            }
            Err(_) => return 0,
        };

        if is_new {
            tracing::debug!(key = %key, "Presence join");
            let _ = self.tx.send(PresenceEvent::Join {
                key: key.to_string(),
            });
        }
        let _ = self.tx.send(PresenceEvent::Sync { count });
        count
    }

    /// Untrack a key; returns whether it was present
    pub fn leave(&self, key: &str) -> bool {
        let removed = self
            .members
            .lock()
            .ok()
            .map(|mut members| (members.remove(key).is_some(), members.len()));

        match removed {
            Some((true, count)) => {
                tracing::debug!(key = %key, "Presence leave");
                let _ = self.tx.send(PresenceEvent::Leave {
                    key: key.to_string(),
                });
                let _ = self.tx.send(PresenceEvent::Sync { count });
                true
            }
            _ => false,
        }
    }

    pub fn members(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .members
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn count(&self) -> usize {
        self.members.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.tx.subscribe()
    }
}

impl Default for PresenceHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl PresenceTransport for PresenceHub {
    async fn track(&self, key: &str, payload: Value) -> Result<(), BridgeError> {
        self.join(key, payload);
        Ok(())
    }

    async fn untrack(&self, key: &str) -> Result<(), BridgeError> {
        self.leave(key);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<PresenceEvent> {
        self.subscribe()
    }
}

/// Timing for the connection indicator
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often the presence key is re-tracked
    pub heartbeat_interval: Duration,
    /// How often staleness is checked
    pub check_interval: Duration,
    /// Wait after a `leave` before re-checking
    pub leave_delay: Duration,
    /// A `leave` flips offline only if the last ack is older than this
    pub leave_grace: Duration,
    /// The periodic check flips offline past this age
    pub stale_after: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            check_interval: Duration::from_secs(30),
            leave_delay: Duration::from_secs(2),
            leave_grace: Duration::from_secs(5),
            stale_after: Duration::from_secs(120),
        }
    }
}

/// Current indicator state
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStatus {
    pub live: bool,
    /// Last time the connection was confirmed live
    pub last_update: Instant,
}

struct MonitorInner {
    transport: Arc<dyn PresenceTransport>,
    key: String,
    config: HeartbeatConfig,
    status: watch::Sender<ConnectionStatus>,
}

impl MonitorInner {
    fn mark_live(&self) {
        self.status.send_modify(|s| {
            s.live = true;
            s.last_update = Instant::now();
        });
    }

    fn mark_offline(&self) {
        self.status.send_if_modified(|s| {
            let changed = s.live;
            s.live = false;
            changed
        });
    }

    fn stale_for(&self, age: Duration) -> bool {
        self.status.borrow().last_update.elapsed() > age
    }

    async fn heartbeat(&self) {
        let payload = serde_json::json!({ "online_at": chrono::Utc::now().to_rfc3339() });
        match self.transport.track(&self.key, payload).await {
            Ok(()) => self.mark_live(),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Presence heartbeat failed");
                self.mark_offline();
            }
        }
    }
}

/// Heartbeat-driven "is the realtime connection alive" indicator
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    /// Monitor with a fresh unique presence key
    pub fn new(transport: Arc<dyn PresenceTransport>, config: HeartbeatConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus {
            live: true,
            last_update: Instant::now(),
        });

        Self {
            inner: Arc::new(MonitorInner {
                transport,
                key: uuid::Uuid::new_v4().to_string(),
                config,
                status,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn is_live(&self) -> bool {
        self.inner.status.borrow().live
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Track once and spawn the heartbeat, staleness and event loops
    pub fn start(&self) {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return,
        };
        if !tasks.is_empty() {
            return;
        }

        // Subscribe before the first track so its join/sync is observed
        let mut events = self.inner.transport.events();

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
            loop {
                // First tick fires immediately
                ticker.tick().await;
                inner.heartbeat().await;
            }
        }));

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.check_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if inner.stale_for(inner.config.stale_after) {
                    tracing::debug!(key = %inner.key, "Presence stale, marking offline");
                    inner.mark_offline();
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(PresenceEvent::Sync { .. }) | Ok(PresenceEvent::Join { .. }) => {
                        inner.mark_live()
                    }
                    Ok(PresenceEvent::Leave { .. }) => {
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            tokio::time::sleep(inner.config.leave_delay).await;
                            if inner.stale_for(inner.config.leave_grace) {
                                inner.mark_offline();
                            }
                        });
                    }
                    Ok(PresenceEvent::Disconnected) => inner.mark_offline(),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        inner.mark_offline();
                        break;
                    }
                }
            }
        }));

        tracing::debug!(key = %self.inner.key, "Connection monitor started");
    }

    /// Stop all loops and untrack the key; safe to call more than once
    pub async fn stop(&self) {
        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        if let Err(e) = self.inner.transport.untrack(&self.inner.key).await {
            tracing::debug!(key = %self.inner.key, error = %e, "Untrack on stop failed");
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
