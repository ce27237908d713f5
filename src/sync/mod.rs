//! Realtime view synchronization
//!
//! - **view**: [`SyncedView`], a local copy of a table that follows the feed
//! - **optimistic**: Patch-then-write mutations with a rollback policy
//! - **debounce**: Single stable debouncer for search input
//! - **throttle**: Reuse of a recent query result

mod debounce;
mod optimistic;
mod throttle;
mod view;

pub use debounce::Debouncer;
pub use optimistic::RollbackPolicy;
pub use throttle::{Throttled, DEFAULT_THROTTLE};
pub use view::{SyncStrategy, SyncedView};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::model::{Query, Record};
use crate::realtime::ChangeFeed;
use crate::store::Backend;

/// Tunables shared by every view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub rollback: RollbackPolicy,
    pub search_debounce: Duration,
    pub throttle: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            rollback: RollbackPolicy::Restore,
            search_debounce: Duration::from_millis(300),
            throttle: DEFAULT_THROTTLE,
        }
    }
}

/// Backend, feed and options handed to every dashboard view
#[derive(Clone)]
pub struct SyncContext {
    backend: Arc<dyn Backend>,
    feed: Arc<ChangeFeed>,
    options: SyncOptions,
}

impl SyncContext {
    /// Views follow the backend's own feed
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let feed = backend.feed();
        Self {
            backend,
            feed,
            options: SyncOptions::default(),
        }
    }

    /// Views follow `feed`, e.g. one filled by a `FeedBridge`
    pub fn with_feed(backend: Arc<dyn Backend>, feed: Arc<ChangeFeed>) -> Self {
        Self {
            backend,
            feed,
            options: SyncOptions::default(),
        }
    }

    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    pub fn sync_options(&self) -> SyncOptions {
        self.options
    }

    /// Build an unmounted view on this context
    pub fn view<T: Record>(
        &self,
        name: impl Into<String>,
        query: Query,
        strategy: SyncStrategy,
    ) -> SyncedView<T> {
        SyncedView::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.feed),
            name,
            query,
            strategy,
            self.options.rollback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Department;
    use crate::store::{BackendExt, SqliteStore};

    #[tokio::test]
    async fn test_context_views_share_feed() {
        let store = Arc::new(SqliteStore::in_memory(Arc::new(ChangeFeed::default())).unwrap());
        store.insert_row(&Department::new("Cardiology", 2)).await.unwrap();

        let ctx = SyncContext::new(store.clone()).options(SyncOptions {
            rollback: RollbackPolicy::Retain,
            ..SyncOptions::default()
        });
        let view = ctx.view::<Department>("departments", Query::new().asc("name"), SyncStrategy::Reload);
        view.mount().await;

        assert_eq!(view.len(), 1);
        assert_eq!(view.rollback_policy(), RollbackPolicy::Retain);
        assert_eq!(ctx.feed().open_channels(), 1);
        assert!(Arc::ptr_eq(ctx.feed(), &store.feed()));
    }
}
