//! End-to-end: a server on a local port, a remote backend and a feed
//! bridge on the client side, and synced views following the wire.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use wardwatch::api::{serve_listener, AppState};
use wardwatch::config::Config;
use wardwatch::fixtures;
use wardwatch::model::{Bed, BedStatus, Query, Table};
use wardwatch::realtime::{BridgeConfig, ChangeFeed, FeedBridge, PresenceEvent, PresenceTransport};
use wardwatch::store::{
    Backend, BackendExt, NotificationRequest, RemoteBackend, RemoteConfig, SqliteStore, StoreError,
};
use wardwatch::sync::{SyncContext, SyncStrategy};
use wardwatch::websocket::ConnectionHub;

const KEY: &str = "integration-anon-key";

struct Server {
    base_url: String,
    store: Arc<SqliteStore>,
    hub: Arc<ConnectionHub>,
    handle: JoinHandle<()>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server() -> Server {
    let store = Arc::new(SqliteStore::in_memory(Arc::new(ChangeFeed::default())).unwrap());
    fixtures::seed(store.as_ref()).await.unwrap();

    let mut config = Config::default();
    config.backend.anon_key = KEY.to_string();
    let state = AppState::new(Arc::clone(&store), config);
    let hub = Arc::clone(&state.hub);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        serve_listener(listener, state, std::future::pending())
            .await
            .unwrap();
    });

    Server {
        base_url: format!("http://{}", addr),
        store,
        hub,
        handle,
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn connect_bridge(server: &Server, tables: Vec<Table>, feed: Arc<ChangeFeed>) -> FeedBridge {
    let config = BridgeConfig::from_backend(&server.base_url, KEY).tables(tables);
    let bridge = FeedBridge::connect(config, feed).await.unwrap();
    let hub = Arc::clone(&server.hub);
    eventually("bridge subscription", || {
        let hub = Arc::clone(&hub);
        async move { hub.channel_count().await == 1 }
    })
    .await;
    bridge
}

#[tokio::test]
async fn remote_view_follows_server_changes() {
    let server = start_server().await;
    let local_feed = Arc::new(ChangeFeed::default());
    let bridge = connect_bridge(&server, vec![Table::Beds], Arc::clone(&local_feed)).await;

    let remote = Arc::new(
        RemoteBackend::new(RemoteConfig::new(&server.base_url, KEY), Arc::clone(&local_feed))
            .unwrap(),
    );
    let ctx = SyncContext::new(remote.clone());
    let view = ctx.view::<Bed>(
        "beds-changes",
        Query::new().eq("department_id", "dept-1").asc("bed_number"),
        SyncStrategy::Reload,
    );
    view.mount().await;
    assert_eq!(view.len(), 4);
    assert_eq!(view.rows()[0].bed_number, "ER-01");

    // Written on the server, seen through the bridge
    server
        .store
        .update_by_id::<Bed>("bed-1-1", json!({"status": "cleaning"}))
        .await
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        view.wait_for(|rows| {
            rows.iter()
                .any(|b| b.id == "bed-1-1" && b.status == BedStatus::Cleaning)
        }),
    )
    .await
    .unwrap();

    // Written through REST by this client
    remote
        .update_by_id::<Bed>("bed-1-2", json!({"status": "reserved"}))
        .await
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        view.wait_for(|rows| {
            rows.iter()
                .any(|b| b.id == "bed-1-2" && b.status == BedStatus::Reserved)
        }),
    )
    .await
    .unwrap();

    let snapshot: Vec<Bed> = server
        .store
        .fetch(&Query::new().eq("department_id", "dept-1").asc("bed_number"))
        .await
        .unwrap();
    assert_eq!(view.rows(), snapshot);

    view.unmount();
    view.unmount();
    assert_eq!(local_feed.open_channels(), 0);

    bridge.disconnect().await;
    let hub = Arc::clone(&server.hub);
    eventually("server cleanup", || {
        let hub = Arc::clone(&hub);
        async move { hub.connection_count().await == 0 && hub.channel_count().await == 0 }
    })
    .await;
}

#[tokio::test]
async fn bridge_only_forwards_requested_tables() {
    let server = start_server().await;
    let local_feed = Arc::new(ChangeFeed::default());
    let mut channel = local_feed.channel("probe").subscribe();
    let bridge = connect_bridge(&server, vec![Table::PatientQueue], Arc::clone(&local_feed)).await;

    server
        .store
        .update_by_id::<Bed>("bed-2-1", json!({"status": "occupied"}))
        .await
        .unwrap();
    server
        .store
        .update(
            Table::PatientQueue,
            &[wardwatch::model::Filter::eq("id", "queue-1")],
            json!({"status": "in_progress"}),
        )
        .await
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), channel.recv())
        .await
        .unwrap()
        .unwrap();
    match message {
        wardwatch::realtime::FeedMessage::Change(event) => {
            assert_eq!(event.table, Table::PatientQueue);
            assert_eq!(event.row_id(), Some("queue-1"));
        }
        other => panic!("unexpected {:?}", other),
    }

    bridge.disconnect().await;
}

#[tokio::test]
async fn presence_over_the_wire() {
    let server = start_server().await;
    let bridge = connect_bridge(&server, vec![], Arc::new(ChangeFeed::default())).await;
    let mut events = bridge.events();

    bridge.track("tab-1", json!({"online_at": "now"})).await.unwrap();

    let joined = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(PresenceEvent::Join { key }) = events.recv().await {
                return key;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(joined, "tab-1");
    assert_eq!(server.hub.presence().count(), 1);

    bridge.disconnect().await;
    let hub = Arc::clone(&server.hub);
    eventually("presence cleanup", || {
        let hub = Arc::clone(&hub);
        async move { hub.presence().count() == 0 }
    })
    .await;
}

#[tokio::test]
async fn wrong_key_is_refused() {
    let server = start_server().await;

    let config = BridgeConfig::from_backend(&server.base_url, "wrong-key");
    assert!(FeedBridge::connect(config, Arc::new(ChangeFeed::default()))
        .await
        .is_err());

    let remote = RemoteBackend::new(
        RemoteConfig::new(&server.base_url, "wrong-key"),
        Arc::new(ChangeFeed::default()),
    )
    .unwrap();
    let err = remote.select(Table::Beds, &Query::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::Remote { status: 401, .. }));
}

#[tokio::test]
async fn notification_function_over_rest() {
    let server = start_server().await;
    let remote = RemoteBackend::new(
        RemoteConfig::new(&server.base_url, KEY),
        Arc::new(ChangeFeed::default()),
    )
    .unwrap();

    let outcome = remote
        .create_notification(NotificationRequest::to_user(
            fixtures::NURSE_USER,
            "Bed ready",
            "ER-02 has been cleaned",
        ))
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.data.unwrap().user_id, fixtures::NURSE_USER);

    let err = remote
        .create_notification(NotificationRequest::broadcast("", "no title"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Remote { status: 400, .. }));
}
