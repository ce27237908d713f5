//! Remote change-feed bridge
//!
//! Connects to a server's realtime endpoint over WebSocket, subscribes
//! one channel to the requested tables and republishes every received
//! change into a local [`ChangeFeed`]. Views never know whether their
//! feed is fed by an embedded store or by this bridge.
//!
//! There is no reconnect: a dropped socket surfaces as
//! [`PresenceEvent::Disconnected`] and the caller decides what to do.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::feed::ChangeFeed;
use super::presence::{PresenceEvent, PresenceTransport};
use crate::model::Table;
use crate::websocket::{ClientMessage, PresenceKind, ServerMessage};

/// Errors from the realtime client side
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid connection request: {0}")]
    InvalidRequest(String),

    #[error("Not connected to realtime server")]
    Disconnected,

    #[error("Failed to send message: {0}")]
    Send(String),
}

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// WebSocket URL of the realtime endpoint
    pub url: String,
    pub api_key: String,
    /// Channel name announced to the server
    pub channel: String,
    /// Tables to forward; empty forwards all
    pub tables: Vec<Table>,
    pub ping_interval: Duration,
}

impl BridgeConfig {
    /// Derive the realtime URL from a REST base URL (`http://host:port`)
    pub fn from_backend(base_url: &str, api_key: impl Into<String>) -> Self {
        let base = base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        Self {
            url: format!("{}/realtime/v1/websocket", ws_base),
            api_key: api_key.into(),
            channel: "dashboard-feed".to_string(),
            tables: Vec::new(),
            ping_interval: Duration::from_secs(30),
        }
    }

    pub fn tables(mut self, tables: impl IntoIterator<Item = Table>) -> Self {
        self.tables = tables.into_iter().collect();
        self
    }
}

/// WebSocket client feeding a local [`ChangeFeed`]
pub struct FeedBridge {
    feed: Arc<ChangeFeed>,
    channel: String,
    sender: Arc<Mutex<Option<mpsc::Sender<Message>>>>,
    presence_tx: broadcast::Sender<PresenceEvent>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl FeedBridge {
    /// Connect, subscribe and start forwarding
    pub async fn connect(config: BridgeConfig, feed: Arc<ChangeFeed>) -> Result<Self, BridgeError> {
        let mut request = config.url.as_str().into_client_request()?;
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| BridgeError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert("apikey", key);

        tracing::info!(url = %config.url, channel = %config.channel, "Connecting to realtime feed");
        let (ws_stream, _) = connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = ClientMessage::Subscribe {
            channel: config.channel.clone(),
            tables: config.tables.clone(),
        };
        write
            .send(Message::Text(serde_json::to_string(&subscribe)?))
            .await?;

        let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(100);
        let sender = Arc::new(Mutex::new(Some(msg_tx.clone())));
        let (presence_tx, _) = broadcast::channel(64);

        let writer = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let ping_sender = msg_tx;
        let ping_interval = config.ping_interval;
        let pinger = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Ok(json) = serde_json::to_string(&ClientMessage::Ping) else {
                    continue;
                };
                if ping_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        let reader_feed = Arc::clone(&feed);
        let reader_presence = presence_tx.clone();
        let reader_sender = Arc::clone(&sender);
        let reader = tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => handle_server_message(&reader_feed, &reader_presence, msg),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to parse realtime message");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Realtime connection closed");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Realtime WebSocket error");
                        break;
                    }
                }
            }

            *reader_sender.lock().await = None;
            let _ = reader_presence.send(PresenceEvent::Disconnected);
        });

        Ok(Self {
            feed,
            channel: config.channel,
            sender,
            presence_tx,
            tasks: std::sync::Mutex::new(vec![writer, pinger, reader]),
        })
    }

    pub fn feed(&self) -> Arc<ChangeFeed> {
        Arc::clone(&self.feed)
    }

    pub async fn is_connected(&self) -> bool {
        self.sender.lock().await.is_some()
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), BridgeError> {
        let json = serde_json::to_string(msg)?;
        let guard = self.sender.lock().await;
        let sender = guard.as_ref().ok_or(BridgeError::Disconnected)?;
        sender
            .send(Message::Text(json))
            .await
            .map_err(|e| BridgeError::Send(e.to_string()))
    }

    /// Unsubscribe and close the socket
    pub async fn disconnect(&self) {
        let unsubscribe = ClientMessage::Unsubscribe {
            channel: self.channel.clone(),
        };
        if let Err(e) = self.send(&unsubscribe).await {
            tracing::debug!(error = %e, "Unsubscribe on disconnect failed");
        }

        if let Some(sender) = self.sender.lock().await.take() {
            let _ = sender.send(Message::Close(None)).await;
        }

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            task.abort();
        }
        tracing::info!(channel = %self.channel, "Disconnected from realtime feed");
    }
}

impl Drop for FeedBridge {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

fn handle_server_message(
    feed: &ChangeFeed,
    presence: &broadcast::Sender<PresenceEvent>,
    msg: ServerMessage,
) {
    match msg {
        ServerMessage::Change { event, .. } => {
            feed.publish(event);
        }
        ServerMessage::Presence { event, key, count } => {
            let event = match (event, key) {
                (PresenceKind::Join, Some(key)) => PresenceEvent::Join { key },
                (PresenceKind::Leave, Some(key)) => PresenceEvent::Leave { key },
                _ => PresenceEvent::Sync { count },
            };
            let _ = presence.send(event);
        }
        ServerMessage::Error { message } => {
            tracing::warn!(error = %message, "Realtime server error");
        }
        other => {
            tracing::debug!(message = ?other, "Realtime message");
        }
    }
}

#[async_trait]
impl PresenceTransport for FeedBridge {
    async fn track(&self, key: &str, payload: Value) -> Result<(), BridgeError> {
        self.send(&ClientMessage::Track {
            key: key.to_string(),
            payload,
        })
        .await
    }

    async fn untrack(&self, key: &str) -> Result<(), BridgeError> {
        self.send(&ClientMessage::Untrack {
            key: key.to_string(),
        })
        .await
    }

    fn events(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence_tx.subscribe()
    }
}
