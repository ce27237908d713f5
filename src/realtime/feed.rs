//! Change Feed
//!
//! Row-level change events for every table, fanned out to named channels.
//! The feed is transport-agnostic: the embedded store publishes into it
//! directly, and a [`super::FeedBridge`] republishes events received from
//! a remote backend. Views only ever see a local feed.
//!
//! Every open channel is registered so leaked listeners are observable:
//! [`ChangeFeed::open_channels`] must return to zero once every view has
//! unmounted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{Record, Table};

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single row change: `{table, eventType, new, old, commit_timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn insert(table: Table, new: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            new: Some(new),
            old: None,
            commit_timestamp: Utc::now(),
        }
    }

    pub fn update(table: Table, old: Value, new: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            new: Some(new),
            old: Some(old),
            commit_timestamp: Utc::now(),
        }
    }

    pub fn delete(table: Table, old: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
            commit_timestamp: Utc::now(),
        }
    }

    /// Id of the affected row, taken from `new` then `old`
    pub fn row_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .and_then(|v| v.get("id"))
            .or_else(|| self.old.as_ref().and_then(|v| v.get("id")))
            .and_then(Value::as_str)
    }
}

/// What a channel yields
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Change(ChangeEvent),
    /// The receiver fell behind and skipped this many events
    Lagged(u64),
}

/// Broadcast hub for change events
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
    /// Open channels: registration id → client-chosen name
    channels: Mutex<HashMap<Uuid, String>>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an event to every open channel
    ///
    /// Returns the number of receivers that saw it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        tracing::trace!(
            table = %event.table,
            kind = ?event.kind,
            row_id = ?event.row_id(),
            "Publishing change"
        );
        self.tx.send(event).unwrap_or(0)
    }

    /// Start building a named channel
    pub fn channel(self: &Arc<Self>, name: impl Into<String>) -> ChannelBuilder {
        ChannelBuilder {
            feed: Arc::clone(self),
            name: name.into(),
            tables: Vec::new(),
        }
    }

    /// Number of channels that have been subscribed and not yet closed
    pub fn open_channels(&self) -> usize {
        self.channels.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Names of open channels (duplicates allowed)
    pub fn channel_names(&self) -> Vec<String> {
        self.channels
            .lock()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    fn register(&self, id: Uuid, name: &str) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.insert(id, name.to_string());
        }
        tracing::debug!(channel = %name, "Channel subscribed");
    }

    fn deregister(&self, id: &Uuid) {
        let removed = self.channels.lock().ok().and_then(|mut c| c.remove(id));
        if let Some(name) = removed {
            tracing::debug!(channel = %name, "Channel removed");
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Builder returned by [`ChangeFeed::channel`]
pub struct ChannelBuilder {
    feed: Arc<ChangeFeed>,
    name: String,
    tables: Vec<Table>,
}

impl ChannelBuilder {
    /// Listen to INSERT/UPDATE/DELETE on a table. No tables means all.
    pub fn on(mut self, table: Table) -> Self {
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
        self
    }

    pub fn subscribe(self) -> Channel {
        let registration = Arc::new(ChannelRegistration {
            id: Uuid::new_v4(),
            name: self.name,
            feed: Arc::clone(&self.feed),
            open: AtomicBool::new(true),
        });
        self.feed.register(registration.id, &registration.name);

        Channel {
            rx: self.feed.tx.subscribe(),
            tables: self.tables,
            registration,
        }
    }
}

/// Registry entry for an open channel; closing is idempotent
pub struct ChannelRegistration {
    id: Uuid,
    name: String,
    feed: Arc<ChangeFeed>,
    open: AtomicBool,
}

impl ChannelRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.feed.deregister(&self.id);
        }
    }
}

/// A subscribed listener on the feed
pub struct Channel {
    rx: broadcast::Receiver<ChangeEvent>,
    tables: Vec<Table>,
    registration: Arc<ChannelRegistration>,
}

impl Channel {
    pub fn name(&self) -> &str {
        self.registration.name()
    }

    pub fn is_open(&self) -> bool {
        self.registration.is_open()
    }

    /// Shared handle that can close this channel from elsewhere
    pub fn registration(&self) -> Arc<ChannelRegistration> {
        Arc::clone(&self.registration)
    }

    /// Next event for one of this channel's tables
    ///
    /// Returns `None` once the channel is closed or the feed is gone.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        loop {
            if !self.is_open() {
                return None;
            }
            match self.rx.recv().await {
                Ok(event) => {
                    if self.tables.is_empty() || self.tables.contains(&event.table) {
                        return Some(FeedMessage::Change(event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.name(), skipped, "Channel lagged");
                    return Some(FeedMessage::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Close the channel; safe to call more than once
    pub fn close(&mut self) {
        self.registration.close();
    }

    /// Typed stream of changes for a single table
    pub fn into_typed<T: Record>(self) -> TableStream<T> {
        TableStream {
            channel: self,
            _marker: PhantomData,
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.registration.close();
    }
}

/// Decoded change to a typed row
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange<T> {
    Insert(T),
    Update { old: Option<T>, new: T },
    Delete { id: String, old: Option<T> },
    /// Events were missed or could not be decoded; the consumer should reload
    Resync,
}

/// Typed view over a channel: one event stream per table
pub struct TableStream<T> {
    channel: Channel,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> TableStream<T> {
    pub async fn next(&mut self) -> Option<RowChange<T>> {
        loop {
            let event = match self.channel.recv().await? {
                FeedMessage::Change(event) => event,
                FeedMessage::Lagged(_) => return Some(RowChange::Resync),
            };
            if event.table != T::TABLE {
                continue;
            }
            return Some(decode_change(event));
        }
    }

    pub fn close(&mut self) {
        self.channel.close();
    }
}

fn decode_change<T: Record>(event: ChangeEvent) -> RowChange<T> {
    let decode = |v: Option<Value>| v.and_then(|v| serde_json::from_value::<T>(v).ok());

    match event.kind {
        ChangeKind::Insert => match decode(event.new) {
            Some(row) => RowChange::Insert(row),
            None => RowChange::Resync,
        },
        ChangeKind::Update => {
            let old = decode(event.old);
            match decode(event.new) {
                Some(new) => RowChange::Update { old, new },
                None => RowChange::Resync,
            }
        }
        ChangeKind::Delete => {
            let id = event
                .old
                .as_ref()
                .and_then(|v| v.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            match id {
                Some(id) => RowChange::Delete {
                    id,
                    old: decode(event.old),
                },
                None => RowChange::Resync,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bed, BedStatus};
    use serde_json::json;

    fn bed_json(id: &str, status: &str) -> Value {
        json!({"id": id, "department_id": "d1", "bed_number": "A1", "status": status})
    }

    #[tokio::test]
    async fn test_channel_filters_tables() {
        let feed = Arc::new(ChangeFeed::default());
        let mut channel = feed.channel("beds-changes").on(Table::Beds).subscribe();

        feed.publish(ChangeEvent::insert(Table::Staff, json!({"id": "s1"})));
        feed.publish(ChangeEvent::insert(Table::Beds, bed_json("b1", "available")));

        match channel.recv().await {
            Some(FeedMessage::Change(event)) => {
                assert_eq!(event.table, Table::Beds);
                assert_eq!(event.row_id(), Some("b1"));
            }
            other => panic!("Expected bed change, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let feed = Arc::new(ChangeFeed::default());
        let mut a = feed.channel("a").on(Table::Beds).subscribe();
        let b = feed.channel("b").subscribe();
        assert_eq!(feed.open_channels(), 2);

        a.close();
        a.close();
        assert_eq!(feed.open_channels(), 1);
        assert!(a.recv().await.is_none());

        drop(b);
        drop(a);
        assert_eq!(feed.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_lagged_channel_reports_skip() {
        let feed = Arc::new(ChangeFeed::new(2));
        let mut channel = feed.channel("small").subscribe();

        for i in 0..5 {
            feed.publish(ChangeEvent::insert(Table::Beds, bed_json(&i.to_string(), "available")));
        }

        assert!(matches!(channel.recv().await, Some(FeedMessage::Lagged(_))));
    }

    #[tokio::test]
    async fn test_typed_stream_decodes_rows() {
        let feed = Arc::new(ChangeFeed::default());
        let mut stream = feed.channel("typed").on(Table::Beds).subscribe().into_typed::<Bed>();

        feed.publish(ChangeEvent::update(
            Table::Beds,
            bed_json("b1", "available"),
            bed_json("b1", "cleaning"),
        ));
        feed.publish(ChangeEvent::delete(Table::Beds, json!({"id": "b1"})));

        match stream.next().await {
            Some(RowChange::Update { old, new }) => {
                assert_eq!(old.unwrap().status, BedStatus::Available);
                assert_eq!(new.status, BedStatus::Cleaning);
            }
            other => panic!("Expected update, got {:?}", other),
        }

        match stream.next().await {
            Some(RowChange::Delete { id, old }) => {
                assert_eq!(id, "b1");
                assert!(old.is_none());
            }
            other => panic!("Expected delete, got {:?}", other),
        }
    }

    #[test]
    fn test_change_event_wire_shape() {
        let event = ChangeEvent::insert(Table::PatientQueue, json!({"id": "q1"}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "INSERT");
        assert_eq!(json["table"], "patient_queue");
        assert_eq!(json["new"]["id"], "q1");
        assert!(json["old"].is_null());
    }
}
