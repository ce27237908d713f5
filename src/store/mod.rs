//! Row store
//!
//! - **backend**: The `Backend` trait and typed helpers
//! - **sqlite**: Embedded SQLite store with a change feed
//! - **remote**: REST client for a running server
//!
//! Both implementations return rows as JSON objects carrying `id`,
//! `created_at` and `updated_at`, and both reject unfiltered updates and
//! deletes.

mod backend;
mod error;
mod remote;
mod sqlite;

pub use backend::{Backend, BackendExt, NotificationOutcome, NotificationRequest};
pub use error::{StoreError, StoreResult};
pub use remote::{RemoteBackend, RemoteConfig};
pub use sqlite::SqliteStore;

#[cfg(test)]
pub(crate) mod testing;
