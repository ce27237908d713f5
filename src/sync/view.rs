//! Synced views
//!
//! A [`SyncedView`] keeps an ordered local copy of one table (optionally
//! filtered) and follows the change feed so the copy reflects the table as
//! of the most recently processed event.
//!
//! Lifecycle:
//!
//! ```text
//! mount()    subscribe, then load
//! event      Reload: load again | Patch: upsert/remove one row
//! lagged     always a full load
//! unmount()  close the channel; loads still in flight are discarded
//! ```

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::optimistic::RollbackPolicy;
use crate::model::{Query, Record};
use crate::realtime::{Channel, ChangeFeed, ChannelRegistration, RowChange};
use crate::store::{Backend, BackendExt, StoreResult};

/// How a view reacts to a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Refetch the whole snapshot
    Reload,
    /// Apply the changed row locally and re-sort
    Patch,
}

pub(super) struct ViewInner<T> {
    pub(super) backend: Arc<dyn Backend>,
    feed: Arc<ChangeFeed>,
    pub(super) query: Query,
    strategy: SyncStrategy,
    name: String,
    pub(super) rollback: RollbackPolicy,
    rows: RwLock<Vec<T>>,
    version: watch::Sender<u64>,
    loading: AtomicBool,
    /// Bumped on unmount so late loads can tell they are stale
    epoch: AtomicU64,
    loads: AtomicU64,
    pending: Mutex<PendingChanges<T>>,
}

/// Changes patched in while a snapshot fetch is outstanding
struct PendingChanges<T> {
    in_flight: usize,
    changes: Vec<RowChange<T>>,
}

impl<T> PendingChanges<T> {
    fn finish(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.changes.clear();
        }
    }
}

impl<T: Record> ViewInner<T> {
    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Fetch and install a snapshot. `Ok(None)` means it was discarded
    /// because the view was unmounted while the fetch was in flight.
    async fn fetch_and_install(&self) -> StoreResult<Option<usize>> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.begin_load();
        self.loading.store(true, Ordering::SeqCst);
        let result = self.backend.fetch::<T>(&self.query).await;
        self.loading.store(false, Ordering::SeqCst);

        if self.epoch.load(Ordering::SeqCst) != epoch {
            self.end_load();
            tracing::debug!(view = %self.name, "Discarding load completed after unmount");
            return Ok(None);
        }

        match result {
            Ok(rows) => {
                let count = rows.len();
                self.install(rows);
                self.loads.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(view = %self.name, rows = count, "View loaded");
                self.bump();
                Ok(Some(count))
            }
            Err(e) => {
                self.end_load();
                Err(e)
            }
        }
    }

    async fn load(&self) {
        if let Err(e) = self.fetch_and_install().await {
            tracing::error!(view = %self.name, table = %T::TABLE, error = %e, "Error fetching rows");
        }
    }

    fn begin_load(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.in_flight += 1;
        }
    }

    fn end_load(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.finish();
        }
    }

    /// Replace the rows with a snapshot, then replay the changes applied
    /// while it was being fetched
    fn install(&self, snapshot: Vec<T>) {
        let Ok(mut rows) = self.rows.write() else {
            self.end_load();
            return;
        };
        *rows = snapshot;
        let replay = match self.pending.lock() {
            Ok(mut pending) => {
                let replay = pending.changes.clone();
                pending.finish();
                replay
            }
            Err(_) => Vec::new(),
        };
        if !replay.is_empty() {
            tracing::trace!(view = %self.name, changes = replay.len(), "Replaying changes onto snapshot");
        }
        for change in replay {
            match change {
                RowChange::Insert(row) | RowChange::Update { new: row, .. } => {
                    self.upsert_into(&mut rows, row)
                }
                RowChange::Delete { id, .. } => rows.retain(|r| r.id() != id),
                RowChange::Resync => {}
            }
        }
        self.sort(&mut rows);
    }

    async fn follow(self: Arc<Self>, channel: Channel) {
        let mut stream = channel.into_typed::<T>();
        while let Some(change) = stream.next().await {
            match (self.strategy, change) {
                (_, RowChange::Resync) => self.load().await,
                (SyncStrategy::Reload, change) => {
                    if self.concerns(&change) {
                        self.load().await;
                    }
                }
                (SyncStrategy::Patch, change) => self.apply(change),
            }
        }
    }

    /// Whether a change can affect the filtered rows
    fn concerns(&self, change: &RowChange<T>) -> bool {
        let matches = |row: &T| {
            serde_json::to_value(row)
                .map(|v| self.query.matches(&v))
                .unwrap_or(true)
        };
        match change {
            RowChange::Insert(row) => matches(row),
            RowChange::Update { old, new } => matches(new) || old.as_ref().map_or(true, matches),
            RowChange::Delete { old, .. } => old.as_ref().map_or(true, matches),
            RowChange::Resync => true,
        }
    }

    fn apply(&self, change: RowChange<T>) {
        if let Ok(mut pending) = self.pending.lock() {
            if pending.in_flight > 0 {
                pending.changes.push(change.clone());
            }
        }
        match change {
            RowChange::Insert(row) | RowChange::Update { new: row, .. } => self.upsert(row),
            RowChange::Delete { id, .. } => {
                self.remove(&id);
            }
            RowChange::Resync => {}
        }
    }

    /// Insert or replace by id, dropping rows that no longer match
    pub(super) fn upsert(&self, row: T) {
        if let Ok(mut rows) = self.rows.write() {
            self.upsert_into(&mut rows, row);
            self.sort(&mut rows);
        }
        self.bump();
    }

    fn upsert_into(&self, rows: &mut Vec<T>, row: T) {
        let value = serde_json::to_value(&row).unwrap_or(Value::Null);
        rows.retain(|r| r.id() != row.id());
        if self.query.matches(&value) {
            rows.push(row);
        }
    }

    pub(super) fn remove(&self, id: &str) -> Option<T> {
        let removed = self.rows.write().ok().and_then(|mut rows| {
            let index = rows.iter().position(|r| r.id() == id)?;
            Some(rows.remove(index))
        });
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Modify one row in place; returns the prior copy
    pub(super) fn modify<F: FnOnce(&mut T)>(&self, id: &str, f: F) -> Option<T> {
        let prior = self.rows.write().ok().and_then(|mut rows| {
            let row = rows.iter_mut().find(|r| r.id() == id)?;
            let prior = row.clone();
            f(row);
            self.sort(&mut rows);
            Some(prior)
        });
        if prior.is_some() {
            self.bump();
        }
        prior
    }

    /// Put a prior copy back if the row is still present
    pub(super) fn restore(&self, prior: T) {
        let restored = self
            .rows
            .write()
            .ok()
            .map(|mut rows| {
                let slot = rows.iter_mut().find(|r| r.id() == prior.id());
                let found = slot.is_some();
                if let Some(slot) = slot {
                    *slot = prior;
                }
                if found {
                    self.sort(&mut rows);
                }
                found
            })
            .unwrap_or(false);
        if restored {
            self.bump();
        }
    }

    fn sort(&self, rows: &mut Vec<T>) {
        if !self.query.order.is_empty() {
            let mut keyed: Vec<(Value, T)> = rows
                .drain(..)
                .map(|r| (serde_json::to_value(&r).unwrap_or(Value::Null), r))
                .collect();
            keyed.sort_by(|a, b| self.query.compare(&a.0, &b.0));
            rows.extend(keyed.into_iter().map(|(_, r)| r));
        }
        if let Some(limit) = self.query.limit {
            rows.truncate(limit);
        }
    }
}

struct Subscription {
    registration: Arc<ChannelRegistration>,
    task: JoinHandle<()>,
}

impl Subscription {
    fn close(self) {
        self.registration.close();
        self.task.abort();
    }
}

/// Local, feed-following copy of a table
pub struct SyncedView<T: Record> {
    pub(super) inner: Arc<ViewInner<T>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<T: Record> SyncedView<T> {
    pub fn new(
        backend: Arc<dyn Backend>,
        feed: Arc<ChangeFeed>,
        name: impl Into<String>,
        query: Query,
        strategy: SyncStrategy,
        rollback: RollbackPolicy,
    ) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(ViewInner {
                backend,
                feed,
                query,
                strategy,
                name: name.into(),
                rollback,
                rows: RwLock::new(Vec::new()),
                version,
                loading: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                loads: AtomicU64::new(0),
                pending: Mutex::new(PendingChanges {
                    in_flight: 0,
                    changes: Vec::new(),
                }),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Fetch a fresh snapshot; failures are logged and the old rows kept
    pub async fn load(&self) {
        self.inner.load().await;
    }

    /// Fetch a snapshot, reporting failure to the caller. Returns the
    /// number of rows fetched, or zero when the view was unmounted before
    /// the fetch completed.
    pub async fn try_load(&self) -> StoreResult<usize> {
        Ok(self.inner.fetch_and_install().await?.unwrap_or(0))
    }

    /// Open the change channel, replacing any earlier one
    pub fn subscribe(&self) {
        let mut guard = match self.subscription.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if let Some(old) = guard.take() {
            old.close();
        }

        let channel = self
            .inner
            .feed
            .channel(self.inner.name.clone())
            .on(T::TABLE)
            .subscribe();
        let registration = channel.registration();
        let task = tokio::spawn(Arc::clone(&self.inner).follow(channel));

        *guard = Some(Subscription { registration, task });
        tracing::debug!(view = %self.inner.name, table = %T::TABLE, "View subscribed");
    }

    /// Close the change channel; safe to call more than once
    pub fn unsubscribe(&self) {
        let subscription = self.subscription.lock().ok().and_then(|mut s| s.take());
        if let Some(subscription) = subscription {
            subscription.close();
            tracing::debug!(view = %self.inner.name, "View unsubscribed");
        }
    }

    /// Subscribe, then load; changes arriving during the load are replayed
    /// onto the snapshot
    pub async fn mount(&self) {
        self.subscribe();
        self.load().await;
    }

    pub fn unmount(&self) {
        self.unsubscribe();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .map(|s| s.as_ref().map(|s| s.registration.is_open()).unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn rows(&self) -> Vec<T> {
        self.inner.rows.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.inner
            .rows
            .read()
            .ok()
            .and_then(|rows| rows.iter().find(|r| r.id() == id).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    /// Successful loads so far
    pub fn load_count(&self) -> u64 {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn version(&self) -> u64 {
        *self.inner.version.borrow()
    }

    /// Receiver that changes whenever the rows do
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Wait until the rows satisfy `f`
    pub async fn wait_for<F>(&self, mut f: F)
    where
        F: FnMut(&[T]) -> bool,
    {
        let mut changes = self.changes();
        loop {
            changes.borrow_and_update();
            let done = self.inner.rows.read().map(|r| f(&r)).unwrap_or(false);
            if done || changes.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn query(&self) -> &Query {
        &self.inner.query
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Insert or replace a row locally (after a confirmed write)
    pub fn upsert_local(&self, row: T) {
        self.inner.upsert(row);
    }

    /// Remove a row locally; returns it if it was present
    pub fn remove_local(&self, id: &str) -> Option<T> {
        self.inner.remove(id)
    }
}

impl<T: Record> Drop for SyncedView<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bed, BedStatus, Filter, Table};
    use crate::store::SqliteStore;
    use serde_json::json;
    use std::time::Duration;

    async fn setup() -> (Arc<SqliteStore>, Arc<ChangeFeed>) {
        let feed = Arc::new(ChangeFeed::default());
        let store = Arc::new(SqliteStore::in_memory(Arc::clone(&feed)).unwrap());
        (store, feed)
    }

    fn bed_view(store: &Arc<SqliteStore>, strategy: SyncStrategy, query: Query) -> SyncedView<Bed> {
        SyncedView::new(
            store.clone(),
            store.feed(),
            "beds-changes",
            query,
            strategy,
            RollbackPolicy::Restore,
        )
    }

    async fn within<F: std::future::Future>(f: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), f)
            .await
            .expect("timed out")
    }

    #[tokio::test]
    async fn test_reload_view_follows_external_insert() {
        let (store, feed) = setup().await;
        store.insert_row(&Bed::new("d1", "A1")).await.unwrap();

        let view = bed_view(&store, SyncStrategy::Reload, Query::new().asc("bed_number"));
        view.mount().await;
        assert_eq!(view.len(), 1);
        assert_eq!(feed.open_channels(), 1);

        store.insert_row(&Bed::new("d1", "A0")).await.unwrap();
        within(view.wait_for(|rows| rows.len() == 2)).await;
        assert_eq!(view.rows()[0].bed_number, "A0");
        assert!(view.load_count() >= 2);

        view.unmount();
        assert_eq!(feed.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_patch_view_upserts_and_removes() {
        let (store, _feed) = setup().await;
        let query = Query::new().eq("department_id", "d1").asc("bed_number");
        let view = bed_view(&store, SyncStrategy::Patch, query);
        view.mount().await;
        assert!(view.is_empty());

        let b2 = store.insert_row(&Bed::new("d1", "B2")).await.unwrap();
        let a1 = store.insert_row(&Bed::new("d1", "A1")).await.unwrap();
        store.insert_row(&Bed::new("d2", "Z9")).await.unwrap();
        within(view.wait_for(|rows| rows.len() == 2)).await;
        let numbers: Vec<_> = view.rows().into_iter().map(|b| b.bed_number).collect();
        assert_eq!(numbers, vec!["A1", "B2"]);

        let _: Bed = store
            .update_by_id(&a1.id, json!({"status": "occupied"}))
            .await
            .unwrap();
        within(view.wait_for(|rows| {
            rows.iter().any(|b| b.id == a1.id && b.status == BedStatus::Occupied)
        }))
        .await;

        // Moving a bed out of the filtered department drops it from the view
        store
            .update(Table::Beds, &[Filter::eq("id", b2.id.as_str())], json!({"department_id": "d2"}))
            .await
            .unwrap();
        within(view.wait_for(|rows| rows.len() == 1)).await;

        store.delete_by_id::<Bed>(&a1.id).await.unwrap();
        within(view.wait_for(|rows| rows.is_empty())).await;
        // Patch views never reload after the initial load
        assert_eq!(view.load_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_resubscribe_replaces() {
        let (store, feed) = setup().await;
        let view = bed_view(&store, SyncStrategy::Reload, Query::new());

        view.subscribe();
        view.subscribe();
        assert_eq!(feed.open_channels(), 1);
        assert!(view.is_subscribed());

        view.unsubscribe();
        view.unsubscribe();
        assert_eq!(feed.open_channels(), 0);
        assert!(!view.is_subscribed());
    }

    #[tokio::test]
    async fn test_drop_closes_channel() {
        let (store, feed) = setup().await;
        {
            let view = bed_view(&store, SyncStrategy::Patch, Query::new());
            view.mount().await;
            let other = bed_view(&store, SyncStrategy::Reload, Query::new());
            other.mount().await;
            assert_eq!(feed.open_channels(), 2);
        }
        assert_eq!(feed.open_channels(), 0);
    }

    /// Backend whose selects wait for a permit, either before reading the
    /// snapshot or after it has been read
    struct GatedBackend {
        store: Arc<SqliteStore>,
        gate: tokio::sync::Notify,
        selected: tokio::sync::Notify,
        hold_after_select: bool,
    }

    impl GatedBackend {
        fn new(store: Arc<SqliteStore>, hold_after_select: bool) -> Arc<Self> {
            Arc::new(Self {
                store,
                gate: tokio::sync::Notify::new(),
                selected: tokio::sync::Notify::new(),
                hold_after_select,
            })
        }
    }

    #[async_trait::async_trait]
    impl Backend for GatedBackend {
        async fn select(&self, table: Table, query: &Query) -> StoreResult<Vec<Value>> {
            if !self.hold_after_select {
                self.gate.notified().await;
            }
            let rows = self.store.select(table, query).await;
            self.selected.notify_one();
            if self.hold_after_select {
                self.gate.notified().await;
            }
            rows
        }

        async fn insert(&self, table: Table, rows: Vec<Value>) -> StoreResult<Vec<Value>> {
            self.store.insert(table, rows).await
        }

        async fn update(
            &self,
            table: Table,
            filters: &[Filter],
            patch: Value,
        ) -> StoreResult<Vec<Value>> {
            self.store.update(table, filters, patch).await
        }

        async fn delete(&self, table: Table, filters: &[Filter]) -> StoreResult<Vec<Value>> {
            self.store.delete(table, filters).await
        }

        async fn create_notification(
            &self,
            request: crate::store::NotificationRequest,
        ) -> StoreResult<crate::store::NotificationOutcome> {
            self.store.create_notification(request).await
        }

        fn feed(&self) -> Arc<ChangeFeed> {
            self.store.feed()
        }
    }

    #[tokio::test]
    async fn test_load_after_unmount_is_discarded() {
        let (store, feed) = setup().await;
        store.insert_row(&Bed::new("d1", "A1")).await.unwrap();
        let backend = GatedBackend::new(store, false);
        let view: SyncedView<Bed> = SyncedView::new(
            backend.clone(),
            feed,
            "beds-changes",
            Query::new(),
            SyncStrategy::Reload,
            RollbackPolicy::Restore,
        );

        tokio::join!(view.load(), async {
            tokio::task::yield_now().await;
            assert!(view.is_loading());
            view.unmount();
            backend.gate.notify_one();
        });

        assert!(view.is_empty());
        assert_eq!(view.load_count(), 0);

        // A fresh load after unmount still applies
        backend.gate.notify_one();
        view.load().await;
        assert_eq!(view.len(), 1);
    }

    #[tokio::test]
    async fn test_try_load_after_unmount_is_discarded() {
        let (store, feed) = setup().await;
        store.insert_row(&Bed::new("d1", "A1")).await.unwrap();
        let backend = GatedBackend::new(store, false);
        let view: SyncedView<Bed> = SyncedView::new(
            backend.clone(),
            feed,
            "beds-changes",
            Query::new(),
            SyncStrategy::Reload,
            RollbackPolicy::Restore,
        );

        let (loaded, _) = tokio::join!(view.try_load(), async {
            tokio::task::yield_now().await;
            view.unmount();
            backend.gate.notify_one();
        });

        assert_eq!(loaded.unwrap(), 0);
        assert!(view.is_empty());
        assert_eq!(view.load_count(), 0);
    }

    #[tokio::test]
    async fn test_patch_during_load_survives_snapshot() {
        let (store, feed) = setup().await;
        let backend = GatedBackend::new(store.clone(), true);
        let view: SyncedView<Bed> = SyncedView::new(
            backend.clone(),
            feed,
            "beds-changes",
            Query::new().asc("bed_number"),
            SyncStrategy::Patch,
            RollbackPolicy::Restore,
        );

        tokio::join!(view.mount(), async {
            // The snapshot (empty) has been read but not yet installed
            backend.selected.notified().await;
            store.insert_row(&Bed::new("d1", "A1")).await.unwrap();
            within(view.wait_for(|rows| rows.len() == 1)).await;
            backend.gate.notify_one();
        });

        assert_eq!(view.load_count(), 1);
        let numbers: Vec<_> = view.rows().into_iter().map(|b| b.bed_number).collect();
        assert_eq!(numbers, vec!["A1"]);

        // Changes after the load apply directly and are not buffered
        store.insert_row(&Bed::new("d1", "A0")).await.unwrap();
        within(view.wait_for(|rows| rows.len() == 2)).await;
        assert_eq!(view.rows()[0].bed_number, "A0");
    }

    #[tokio::test]
    async fn test_lagged_channel_triggers_reload() {
        let feed = Arc::new(ChangeFeed::new(1));
        let store = Arc::new(SqliteStore::in_memory(Arc::clone(&feed)).unwrap());
        let view = bed_view(&store, SyncStrategy::Patch, Query::new());
        view.mount().await;
        assert_eq!(view.load_count(), 1);

        store
            .insert(
                Table::Beds,
                vec![
                    json!({"department_id": "d1", "bed_number": "A1", "status": "available"}),
                    json!({"department_id": "d1", "bed_number": "A2", "status": "available"}),
                    json!({"department_id": "d1", "bed_number": "A3", "status": "available"}),
                ],
            )
            .await
            .unwrap();

        within(view.wait_for(|rows| rows.len() == 3)).await;
        assert!(view.load_count() >= 2);
    }
}
