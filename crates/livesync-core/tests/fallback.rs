//! Socket to polling fallback, end to end

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use livesync_core::sync::{
    ConnectionContext, LatestUpdate, PollingConfig, PollingStrategy, SocketConfig, SocketStrategy,
    TransportStrategy, UpdateCallback, UpdateResult, UpdateSource,
};
use livesync_core::{
    EntityType, MultiModeSync, Publication, SubscribeRequest, SyncResult, SyncStore, TransportMode,
};

/// Update source that reports one change per poll
#[derive(Default)]
struct CountingSource {
    polls: AtomicUsize,
    posts: Mutex<Vec<Publication>>,
}

#[async_trait]
impl UpdateSource for CountingSource {
    async fn latest_update(
        &self,
        _id: &str,
        _entity_type: EntityType,
        _since: Option<DateTime<Utc>>,
    ) -> SyncResult<LatestUpdate> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LatestUpdate {
            success: true,
            result: Some(UpdateResult {
                data: Some(json!({ "poll": n })),
                last_update: Utc::now(),
            }),
            message: None,
        })
    }

    async fn post_update(&self, publication: &Publication) -> SyncResult<()> {
        self.posts.lock().unwrap().push(publication.clone());
        Ok(())
    }
}

/// A local URL with nothing listening on it
async fn dead_socket_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

async fn session(source: Arc<CountingSource>) -> MultiModeSync {
    let store = SyncStore::new(ConnectionContext::new([
        TransportMode::Socket,
        TransportMode::Polling,
    ]));

    let socket = SocketStrategy::new(
        SocketConfig {
            url: dead_socket_url().await,
            ready_check_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(2),
            closure_limit: None,
        },
        store.clone(),
    );
    let polling = PollingStrategy::new(
        PollingConfig {
            initial_delay: Duration::from_millis(20),
            interval: Duration::from_millis(50),
        },
        source,
        store.clone(),
    );

    let strategies: Vec<Arc<dyn TransportStrategy>> = vec![Arc::new(socket), Arc::new(polling)];
    MultiModeSync::new(store, strategies)
}

#[tokio::test]
async fn test_unreachable_socket_falls_back_to_polling() {
    let source = Arc::new(CountingSource::default());
    let sync = session(source.clone()).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let on_update: UpdateCallback = Arc::new(move |data: &Value| {
        let _ = tx.send(data.clone());
    });

    let subscribed = sync
        .subscribe(
            SubscribeRequest::new("div-9", EntityType::Division),
            Some(on_update),
            None,
        )
        .await;
    assert!(subscribed);

    let context = sync.context();
    assert_eq!(context.modes, vec![TransportMode::Polling]);
    assert!(context.socket.is_none());
    assert!(context.active_polling().is_some());
    assert_eq!(
        sync.subscriptions().get("div-9").unwrap().served_by,
        Some(TransportMode::Polling)
    );

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("polling should deliver an update")
        .unwrap();
    assert_eq!(first, json!({ "poll": 1 }));

    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("polling should keep going")
        .unwrap();
    assert_eq!(second, json!({ "poll": 2 }));
    assert!(sync.subscriptions().get("div-9").unwrap().last_update.is_some());

    // Publishing skips the pruned socket and goes over HTTP
    assert!(sync.publish("div-9", EntityType::Division, json!({"name": "West"})).await);
    assert_eq!(source.posts.lock().unwrap().len(), 1);

    sync.unsubscribe("div-9").await;
    assert!(sync.subscriptions().is_empty());
    assert!(sync.context().polling.is_none());
}
