//! WebSocket Realtime Endpoint
//!
//! Streams row changes and presence to dashboard clients.
//!
//! ## Architecture
//!
//! - **ConnectionHub**: Connections, their named channels and the presence set
//! - **Handler**: WebSocket upgrade and message processing
//! - **Messages**: Client and server message formats
//!
//! ## Usage
//!
//! Clients connect to `/realtime/v1/websocket?apikey=...` and open
//! channels on tables. An empty `tables` list means every table.
//!
//! ## Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8080/realtime/v1/websocket?apikey=KEY');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'subscribe', channel: 'beds-changes', tables: ['beds']}));
//!   ws.send(JSON.stringify({type: 'track', key: 'tab-1', payload: {online_at: new Date()}}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   if (msg.type === 'change') console.log(msg.channel, msg.event.eventType, msg.event.new);
//! };
//! ```

mod handler;
mod hub;
mod messages;

pub use handler::websocket_handler;
pub use hub::{ConnectionHub, ConnectionId, HubConfig, HubError};
pub use messages::{ClientMessage, PresenceKind, ServerMessage};
