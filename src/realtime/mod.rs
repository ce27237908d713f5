//! Realtime
//!
//! - **feed**: Table change events fanned out to named channels
//! - **presence**: Presence keys and the connection-health indicator
//! - **bridge**: WebSocket client republishing a remote feed locally

pub mod bridge;
pub mod feed;
pub mod presence;

pub use bridge::{BridgeConfig, BridgeError, FeedBridge};
pub use feed::{
    ChangeEvent, ChangeFeed, ChangeKind, Channel, ChannelBuilder, ChannelRegistration,
    FeedMessage, RowChange, TableStream,
};
pub use presence::{
    ConnectionMonitor, ConnectionStatus, HeartbeatConfig, PresenceEvent, PresenceHub,
    PresenceTransport,
};
