//! WebSocket Message Types
//!
//! Wire format of the realtime endpoint, shared by the server hub and the
//! client-side `FeedBridge`. Every message is a JSON object tagged by
//! `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Table;
use crate::realtime::ChangeEvent;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open (or replace) a named channel on some tables; empty means all
    Subscribe {
        channel: String,
        #[serde(default)]
        tables: Vec<Table>,
    },
    /// Close a named channel
    Unsubscribe { channel: String },
    /// Join the presence set under `key`
    Track {
        key: String,
        #[serde(default)]
        payload: Value,
    },
    /// Leave the presence set
    Untrack { key: String },
    /// Ping for keepalive
    Ping,
}

/// Presence change kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Sync,
    Join,
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established
    Connected { connection_id: String },
    /// Channel opened
    Subscribed { channel: String, tables: Vec<Table> },
    /// Channel closed
    Unsubscribed { channel: String },
    /// A row changed on one of the channel's tables
    Change { channel: String, event: ChangeEvent },
    /// Presence set changed
    Presence {
        event: PresenceKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        count: usize,
    },
    /// Pong response to ping
    Pong,
    /// Error message
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_deserialize_subscribe() {
        let json = r#"{"type": "subscribe", "channel": "beds-changes", "tables": ["beds", "patient_queue"]}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Subscribe { channel, tables } => {
                assert_eq!(channel, "beds-changes");
                assert_eq!(tables, vec![Table::Beds, Table::PatientQueue]);
            }
            _ => panic!("Expected Subscribe"),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "subscribe", "channel": "all"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { tables, .. } if tables.is_empty()));
    }

    #[test]
    fn test_client_message_deserialize_ping() {
        let json = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        let json = r#"{"type": "subscribe", "channel": "x", "tables": ["wards"]}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn test_server_message_serialize_change() {
        let event = ChangeEvent::insert(Table::Beds, json!({"id": "b1"}));
        let msg = ServerMessage::Change {
            channel: "beds-changes".to_string(),
            event,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "change");
        assert_eq!(value["event"]["eventType"], "INSERT");
        assert_eq!(value["event"]["table"], "beds");
        assert_eq!(value["event"]["new"]["id"], "b1");
    }

    #[test]
    fn test_server_message_serialize_presence() {
        let msg = ServerMessage::Presence {
            event: PresenceKind::Sync,
            key: None,
            count: 2,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"presence\""));
        assert!(json.contains("\"event\":\"sync\""));
        assert!(!json.contains("key"));
    }

    #[test]
    fn test_server_message_serialize_connected() {
        let msg = ServerMessage::Connected {
            connection_id: "abc-123".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"connection_id\":\"abc-123\""));
    }
}
