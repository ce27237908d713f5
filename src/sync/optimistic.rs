//! Optimistic mutation
//!
//! Patch the local row first, then issue the backend write. When the write
//! fails the [`RollbackPolicy`] decides what the user keeps seeing. The
//! error is always returned so the caller can raise a toast.

use serde::{Deserialize, Serialize};
use std::future::Future;

use super::view::SyncedView;
use crate::model::Record;
use crate::store::StoreResult;

/// What happens to an optimistic patch when its write fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Put the prior row back
    #[default]
    Restore,
    /// Keep the optimistic value until the next load or event
    Retain,
}

impl RollbackPolicy {
    pub fn from_flag(rollback_on_failure: bool) -> Self {
        if rollback_on_failure {
            RollbackPolicy::Restore
        } else {
            RollbackPolicy::Retain
        }
    }
}

impl<T: Record> SyncedView<T> {
    /// Apply `patch` to the local row `id`, returning the prior copy
    pub fn patch_local<F: FnOnce(&mut T)>(&self, id: &str, patch: F) -> Option<T> {
        self.inner.modify(id, patch)
    }

    pub fn rollback_policy(&self) -> RollbackPolicy {
        self.inner.rollback
    }

    /// Optimistically patch row `id`, then await `write`
    ///
    /// A missing local row is not an error: the write still runs and its
    /// result is returned unchanged.
    pub async fn mutate<F, W, R>(&self, id: &str, patch: F, write: W) -> StoreResult<R>
    where
        F: FnOnce(&mut T),
        W: Future<Output = StoreResult<R>>,
    {
        let prior = self.patch_local(id, patch);

        match write.await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(
                    view = %self.name(),
                    row_id = %id,
                    policy = ?self.inner.rollback,
                    error = %e,
                    "Optimistic write failed"
                );
                if let (RollbackPolicy::Restore, Some(prior)) = (self.inner.rollback, prior) {
                    self.inner.restore(prior);
                }
                Err(e)
            }
        }
    }
}
