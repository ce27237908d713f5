//! Test backends

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Backend, NotificationOutcome, NotificationRequest, SqliteStore, StoreError, StoreResult};
use crate::model::{Filter, Query, Table};
use crate::realtime::ChangeFeed;

/// Wraps a store; selects fail while `failing` is set
pub struct FlakyBackend {
    pub store: Arc<SqliteStore>,
    failing: AtomicBool,
}

impl FlakyBackend {
    pub fn new(store: Arc<SqliteStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn select(&self, table: Table, query: &Query) -> StoreResult<Vec<Value>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidRequest(format!("{} unavailable", table)));
        }
        self.store.select(table, query).await
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> StoreResult<Vec<Value>> {
        self.store.insert(table, rows).await
    }

    async fn update(&self, table: Table, filters: &[Filter], patch: Value) -> StoreResult<Vec<Value>> {
        self.store.update(table, filters, patch).await
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> StoreResult<Vec<Value>> {
        self.store.delete(table, filters).await
    }

    async fn create_notification(&self, request: NotificationRequest) -> StoreResult<NotificationOutcome> {
        self.store.create_notification(request).await
    }

    fn feed(&self) -> Arc<ChangeFeed> {
        self.store.feed()
    }
}
