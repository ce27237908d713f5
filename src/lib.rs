//! # wardwatch
//!
//! Hospital resource management: bed tracking, patient queueing, staff and
//! equipment allocation, scheduling, a team directory and notifications,
//! with every widget kept in sync with the backend in realtime.
//!
//! ## Features
//!
//! - **Row store**: SQLite-backed tables with a change feed on every write
//! - **REST API**: `/rest/v1/:table` selects and mutations behind an API key
//! - **Realtime**: WebSocket change feed and presence
//! - **Synced views**: Local table copies that follow the feed, with
//!   optimistic mutations and an explicit rollback policy
//! - **Role gating**: Admin, medical staff and reception capabilities
//!
//! ## Modules
//!
//! - [`model`]: Typed rows and the query vocabulary
//! - [`store`]: The backend seam (embedded SQLite or remote REST)
//! - [`realtime`]: Change feed, presence and the WebSocket bridge
//! - [`auth`]: Auth context, roles and the route guard
//! - [`sync`]: Synced views, optimistic updates, debounce and throttle
//! - [`dashboard`]: One view model per dashboard widget
//! - [`notify`]: Notification fan-out
//! - [`api`] / [`websocket`]: Axum server for the store
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wardwatch::auth::{AuthContext, AuthUser, SessionHandle};
//! use wardwatch::dashboard::BedBoard;
//! use wardwatch::realtime::ChangeFeed;
//! use wardwatch::store::SqliteStore;
//! use wardwatch::sync::SyncContext;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::in_memory(Arc::new(ChangeFeed::default()))?);
//!     wardwatch::fixtures::seed(store.as_ref()).await?;
//!
//!     let session = SessionHandle::signed_in(AuthUser::new("user2", "nurse@hospital.com"));
//!     let auth = AuthContext::new(store.clone(), session);
//!     auth.init();
//!     auth.ready().await;
//!
//!     let board = BedBoard::new(&SyncContext::new(store), auth);
//!     board.mount().await;
//!     println!("{} beds available", board.counts().available);
//!     board.unmount();
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod fixtures;
pub mod model;
pub mod notify;
pub mod realtime;
pub mod store;
pub mod sync;
pub mod websocket;

// Re-export top-level types for convenience
pub use model::{Query, Record, Table};

pub use store::{Backend, BackendExt, RemoteBackend, SqliteStore, StoreError, StoreResult};

pub use realtime::{ChangeEvent, ChangeFeed, FeedBridge, RowChange};

pub use sync::{RollbackPolicy, SyncContext, SyncOptions, SyncStrategy, SyncedView};

pub use auth::{AuthContext, Role};

pub use api::{build_router, serve, ApiError, AppState};

pub use websocket::{ClientMessage, ConnectionHub, HubConfig, HubError, ServerMessage};

pub use config::{Config, ConfigError};
