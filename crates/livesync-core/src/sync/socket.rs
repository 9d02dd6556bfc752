//! Socket transport
//!
//! Keeps at most one WebSocket open per session. The socket is opened lazily
//! by the first subscribe or publish, closed when the last subscription goes
//! away, and reopened lazily after the server drops it.
//!
//! Each socket runs on its own I/O task which writes queued frames, answers
//! `Marco` pings, and dispatches inbound frames to the subscription snapshot
//! bound by the most recent `refresh`.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{ClientFrame, ServerFrame};
use super::strategy::TransportStrategy;
use super::{ConnectionContext, SubscriptionRegistry};
use crate::error::{SyncError, SyncResult};
use crate::models::{Publication, SubscribeRequest, TransportMode};
use crate::store::SyncStore;

/// Lifecycle of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake in progress
    Connecting,
    /// Ready to carry frames
    Open,
    /// Close requested, waiting for the peer
    Closing,
    /// Gone for good
    Closed,
}

/// Configuration for the socket transport
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// WebSocket URL
    pub url: String,
    /// How often to check whether a new socket has opened
    pub ready_check_interval: Duration,
    /// Give up on a socket that has not opened after this long
    pub connect_timeout: Duration,
    /// Ban the socket transport after this many unexpected closures
    pub closure_limit: Option<u32>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            ready_check_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(10),
            closure_limit: None,
        }
    }
}

/// Commands for the socket I/O task
#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close,
}

/// Reference to a live (or once-live) socket
///
/// Cheap to clone; all clones refer to the same connection.
#[derive(Clone)]
pub struct SocketHandle {
    inner: Arc<SocketShared>,
}

struct SocketShared {
    id: Uuid,
    state: watch::Receiver<ReadyState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    bound: RwLock<SubscriptionRegistry>,
}

impl SocketHandle {
    /// Unique id of this connection
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Queue a frame for sending
    pub fn send(&self, frame: &ClientFrame) -> SyncResult<()> {
        let text = frame.encode()?;
        self.inner
            .outbound
            .send(Outbound::Frame(text))
            .map_err(|_| SyncError::unavailable(TransportMode::Socket, "socket is closed"))
    }

    /// Close the socket; closing twice is harmless
    pub fn close(&self) {
        let _ = self.inner.outbound.send(Outbound::Close);
    }

    /// Wait until the I/O task has finished with the socket
    ///
    /// Frames queued before `close` are written first.
    pub async fn closed(&self) {
        let mut state = self.inner.state.clone();
        let _ = state.wait_for(|s| *s == ReadyState::Closed).await;
    }

    /// Point inbound dispatch at a new subscription snapshot
    fn bind(&self, subscriptions: &SubscriptionRegistry) {
        let mut bound = self
            .inner
            .bound
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *bound = subscriptions.clone();
    }

    fn bound(&self) -> SubscriptionRegistry {
        self.inner
            .bound
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.inner.id)
            .field("state", &self.ready_state())
            .finish()
    }
}

/// Socket transport strategy
pub struct SocketStrategy {
    config: SocketConfig,
    store: SyncStore,
}

impl SocketStrategy {
    pub fn new(config: SocketConfig, store: SyncStore) -> Self {
        Self { config, store }
    }

    /// Reuse the open socket or open a new one
    async fn ensure_open(
        &self,
        mut context: ConnectionContext,
        subscriptions: &SubscriptionRegistry,
    ) -> Option<(ConnectionContext, SocketHandle)> {
        if let Some(socket) = context.open_socket().cloned() {
            return Some((context, socket));
        }

        if context.banned {
            debug!("Socket transport is banned for this session");
            return None;
        }

        if self.config.url.is_empty() {
            debug!("No socket URL configured");
            return None;
        }

        let reconnecting = context.connection_attempts > 0;
        context.connection_attempts += 1;
        let socket = spawn_connection(&self.config, self.store.clone(), subscriptions.clone());

        let state = wait_until_ready(
            &socket,
            self.config.ready_check_interval,
            self.config.connect_timeout,
        )
        .await;

        if state != ReadyState::Open {
            warn!(url = %self.config.url, ?state, "Socket did not open");
            socket.close();
            let attempts = context.connection_attempts;
            self.store.update_context(|ctx| ctx.connection_attempts = attempts);
            return None;
        }

        info!(url = %self.config.url, socket = %socket.id(), "Socket opened");

        // A replacement socket knows nothing about earlier subscriptions
        let orphans: Vec<&str> = subscriptions
            .served_by(TransportMode::Socket)
            .map(|sub| sub.id.as_str())
            .collect();
        if reconnecting && !orphans.is_empty() {
            info!(count = orphans.len(), "Re-announcing socket subscriptions");
            for id in orphans {
                if let Err(e) = socket.send(&ClientFrame::subscribed(id)) {
                    warn!(id = %id, "Failed to re-announce subscription: {}", e);
                }
            }
        }

        context.socket = Some(socket.clone());
        Some((context, socket))
    }
}

#[async_trait]
impl TransportStrategy for SocketStrategy {
    fn mode(&self) -> TransportMode {
        TransportMode::Socket
    }

    fn refresh(&self, context: &ConnectionContext, subscriptions: &SubscriptionRegistry) {
        if let Some(socket) = &context.socket {
            socket.bind(subscriptions);
        }
    }

    async fn subscribe(
        &self,
        context: ConnectionContext,
        subscriptions: &SubscriptionRegistry,
        request: &SubscribeRequest,
    ) -> Option<ConnectionContext> {
        let (context, socket) = self.ensure_open(context, subscriptions).await?;
        socket.bind(subscriptions);

        if let Err(e) = socket.send(&ClientFrame::subscribed(&request.id)) {
            warn!(id = %request.id, "Failed to send subscribe frame: {}", e);
            return None;
        }

        debug!(id = %request.id, "Subscribed over socket");
        Some(context)
    }

    async fn unsubscribe(
        &self,
        mut context: ConnectionContext,
        subscriptions: &SubscriptionRegistry,
        id: &str,
    ) -> ConnectionContext {
        let Some(socket) = context.open_socket().cloned() else {
            return context;
        };

        socket.bind(subscriptions);
        if let Err(e) = socket.send(&ClientFrame::unsubscribed(id)) {
            warn!(id = %id, "Failed to send unsubscribe frame: {}", e);
        }

        if subscriptions.is_empty() {
            info!(socket = %socket.id(), "No subscriptions remain, closing socket");
            socket.close();
            context.socket = None;
        }

        context
    }

    async fn publish(
        &self,
        context: ConnectionContext,
        subscriptions: &SubscriptionRegistry,
        publication: &Publication,
    ) -> Option<ConnectionContext> {
        let (context, socket) = self.ensure_open(context, subscriptions).await?;

        let frame = ClientFrame::update(
            &publication.id,
            publication.entity_type,
            publication.data.clone(),
        );
        if let Err(e) = socket.send(&frame) {
            warn!(id = %publication.id, "Failed to send update frame: {}", e);
            return None;
        }

        debug!(id = %publication.id, "Published over socket");
        Some(context)
    }
}

/// Poll the socket state until it leaves `Connecting` or the deadline passes
async fn wait_until_ready(
    socket: &SocketHandle,
    check_interval: Duration,
    timeout: Duration,
) -> ReadyState {
    let deadline = tokio::time::Instant::now() + timeout + check_interval;

    loop {
        let state = socket.ready_state();
        if state != ReadyState::Connecting || tokio::time::Instant::now() >= deadline {
            return state;
        }
        tokio::time::sleep(check_interval).await;
    }
}

/// Open a socket on a background I/O task
fn spawn_connection(
    config: &SocketConfig,
    store: SyncStore,
    subscriptions: SubscriptionRegistry,
) -> SocketHandle {
    let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let socket = SocketHandle {
        inner: Arc::new(SocketShared {
            id: Uuid::new_v4(),
            state: state_rx,
            outbound: outbound_tx,
            bound: RwLock::new(subscriptions),
        }),
    };

    tokio::spawn(connection_loop(
        config.clone(),
        socket.clone(),
        store,
        state_tx,
        outbound_rx,
    ));

    socket
}

/// Connect, then pump frames until the socket closes
async fn connection_loop(
    config: SocketConfig,
    socket: SocketHandle,
    store: SyncStore,
    state_tx: watch::Sender<ReadyState>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let ws_stream =
        match tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()))
            .await
        {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                let err = SyncError::from(e);
                warn!(url = %config.url, "Socket connection failed: {}", err);
                state_tx.send_replace(ReadyState::Closed);
                return;
            }
            Err(_) => {
                warn!(url = %config.url, "Socket connection timed out");
                state_tx.send_replace(ReadyState::Closed);
                return;
            }
        };

    state_tx.send_replace(ReadyState::Open);
    let (mut write, mut read) = ws_stream.split();

    let requested = loop {
        tokio::select! {
            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!(socket = %socket.id(), "Socket write failed: {}", e);
                            break false;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        state_tx.send_replace(ReadyState::Closing);
                        write.close().await.ok();
                        break true;
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&socket, &store, &mut write, &text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => handle_text(&socket, &store, &mut write, &text).await,
                        Err(_) => debug!("Dropping non-UTF-8 binary message"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(socket = %socket.id(), ?frame, "Socket closed by server");
                        break false;
                    }
                    Some(Ok(other)) => {
                        debug!("Ignoring {} byte control message", other.len());
                    }
                    Some(Err(e)) => {
                        warn!(socket = %socket.id(), "Socket error: {}", e);
                        break false;
                    }
                    None => {
                        info!(socket = %socket.id(), "Socket stream ended");
                        break false;
                    }
                }
            }
        }
    };

    state_tx.send_replace(ReadyState::Closed);

    if !requested {
        record_closure(&store, socket.id(), config.closure_limit);
    }
}

/// Clear a dropped socket from the committed context
///
/// A new socket is opened lazily by the next subscribe or publish.
fn record_closure(store: &SyncStore, socket_id: Uuid, closure_limit: Option<u32>) {
    store.update_context(|ctx| {
        if ctx.socket.as_ref().is_some_and(|s| s.id() == socket_id) {
            ctx.socket = None;
        }
        ctx.closures += 1;

        if let Some(limit) = closure_limit {
            if ctx.closures >= limit && !ctx.banned {
                warn!(
                    closures = ctx.closures,
                    "Socket closed too many times, disabling socket transport"
                );
                ctx.banned = true;
                ctx.remove_mode(TransportMode::Socket);
            }
        }
    });
}

/// Dispatch one inbound text frame
async fn handle_text<S>(socket: &SocketHandle, store: &SyncStore, write: &mut S, text: &str)
where
    S: Sink<Message> + Unpin,
    <S as Sink<Message>>::Error: fmt::Display,
{
    let frame = match ServerFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Dropping malformed frame: {}", e);
            return;
        }
    };

    match frame {
        ServerFrame::Update { id, data } => {
            let subscriptions = socket.bound();
            let targets = subscriptions.targets(id.as_deref());
            if targets.is_empty() {
                debug!(id = ?id, "Update for unknown subscription");
                return;
            }

            for sub in &targets {
                sub.notify_update(&data);
            }

            let ids: Vec<String> = targets.iter().map(|sub| sub.id.clone()).collect();
            let now = Utc::now();
            store.update_subscriptions(|subs| {
                for id in &ids {
                    subs.touch(id, now);
                }
            });
        }
        ServerFrame::Marco => {
            let Ok(polo) = ClientFrame::Polo.encode() else {
                return;
            };
            if let Err(e) = write.send(Message::Text(polo)).await {
                warn!("Failed to answer heartbeat: {}", e);
            }
        }
        ServerFrame::Polo => {
            debug!("Heartbeat acknowledged");
        }
        ServerFrame::Error { id, message } => {
            let subscriptions = socket.bound();
            let err = SyncError::delivery(id.clone(), message);
            for sub in subscriptions.targets(id.as_deref()) {
                sub.notify_error(&err);
            }
        }
        ServerFrame::Unknown => {
            warn!("Dropping frame of unknown type: {}", text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use crate::sync::{ErrorCallback, MultiModeSync, Subscription, UpdateCallback};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(5);

    enum ServerCmd {
        Send(Value),
        Close,
    }

    /// WebSocket server recording every frame it receives
    ///
    /// Serves one connection at a time. After `Close` it accepts the next.
    struct TestServer {
        url: String,
        received: mpsc::UnboundedReceiver<Value>,
        commands: mpsc::UnboundedSender<ServerCmd>,
    }

    impl TestServer {
        async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("ws://{}", listener.local_addr().unwrap());
            let (received_tx, received) = mpsc::unbounded_channel();
            let (commands, mut command_rx) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                        continue;
                    };
                    let (mut write, mut read) = ws.split();

                    loop {
                        tokio::select! {
                            cmd = command_rx.recv() => match cmd {
                                Some(ServerCmd::Send(value)) => {
                                    if write.send(Message::Text(value.to_string())).await.is_err() {
                                        break;
                                    }
                                }
                                Some(ServerCmd::Close) => {
                                    let _ = write.close().await;
                                    break;
                                }
                                None => return,
                            },
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = received_tx.send(serde_json::from_str(&text).unwrap());
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                _ => {}
                            },
                        }
                    }
                }
            });

            Self {
                url,
                received,
                commands,
            }
        }

        fn send(&self, value: Value) {
            self.commands.send(ServerCmd::Send(value)).unwrap();
        }

        async fn next_frame(&mut self) -> Value {
            tokio::time::timeout(WAIT, self.received.recv())
                .await
                .expect("timed out waiting for client frame")
                .expect("server task ended")
        }
    }

    fn strategy(url: &str, store: &SyncStore) -> SocketStrategy {
        let config = SocketConfig {
            url: url.to_string(),
            ready_check_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(2),
            closure_limit: None,
        };
        SocketStrategy::new(config, store.clone())
    }

    fn new_store() -> SyncStore {
        SyncStore::new(ConnectionContext::new([TransportMode::Socket]))
    }

    /// Subscription whose callbacks forward into channels
    fn channel_subscription(
        id: &str,
    ) -> (
        Subscription,
        mpsc::UnboundedReceiver<Value>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let on_update: UpdateCallback = Arc::new(move |data: &Value| {
            let _ = update_tx.send(data.clone());
        });
        let on_error: ErrorCallback = Arc::new(move |err: &SyncError| {
            let _ = error_tx.send(err.to_string());
        });
        let sub = Subscription::new(
            &SubscribeRequest::new(id, EntityType::Team),
            Some(on_update),
            Some(on_error),
        );
        (sub, update_rx, error_rx)
    }

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("callback channel closed")
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition never became true");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_subscribe_opens_socket_and_sends_frame() {
        let mut server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let (sub, _updates, _errors) = channel_subscription("team-1");
        let mut subs = SubscriptionRegistry::new();
        subs.insert(sub);

        let ctx = socket
            .subscribe(store.context(), &subs, &SubscribeRequest::new("team-1", EntityType::Team))
            .await
            .expect("socket subscribe should succeed");

        assert!(ctx.open_socket().is_some());
        assert_eq!(ctx.connection_attempts, 1);
        assert_eq!(
            server.next_frame().await,
            json!({"type": "subscribed", "id": "team-1"})
        );
    }

    #[tokio::test]
    async fn test_connect_failure_returns_none() {
        // Grab a free port, then stop listening on it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let store = new_store();
        let socket = strategy(&url, &store);
        let result = socket
            .subscribe(
                store.context(),
                &SubscriptionRegistry::new(),
                &SubscribeRequest::new("team-1", EntityType::Team),
            )
            .await;

        assert!(result.is_none());
        assert_eq!(store.context().connection_attempts, 1);
        assert!(store.context().socket.is_none());
    }

    #[tokio::test]
    async fn test_banned_socket_is_not_opened() {
        let server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let mut ctx = store.context();
        ctx.banned = true;
        let result = socket
            .subscribe(ctx, &SubscriptionRegistry::new(), &SubscribeRequest::new("x", EntityType::Game))
            .await;

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_marco_is_answered_with_polo() {
        let mut server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let (sub, _updates, _errors) = channel_subscription("team-1");
        let mut subs = SubscriptionRegistry::new();
        subs.insert(sub);
        socket
            .subscribe(store.context(), &subs, &SubscribeRequest::new("team-1", EntityType::Team))
            .await
            .unwrap();
        server.next_frame().await;

        server.send(json!({"type": "Marco"}));
        assert_eq!(server.next_frame().await, json!({"type": "polo"}));
    }

    #[tokio::test]
    async fn test_targeted_and_broadcast_updates() {
        let server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let (sub_a, mut updates_a, _errors_a) = channel_subscription("a");
        let (sub_b, mut updates_b, _errors_b) = channel_subscription("b");
        let mut subs = SubscriptionRegistry::new();
        subs.insert(sub_a);
        subs.insert(sub_b);
        store.set_subscriptions(subs.clone());

        let ctx = socket
            .subscribe(store.context(), &subs, &SubscribeRequest::new("a", EntityType::Team))
            .await
            .unwrap();
        store.set_context(ctx);

        server.send(json!({"type": "Update", "id": "a", "data": {"wins": 1}}));
        assert_eq!(recv(&mut updates_a).await, json!({"wins": 1}));

        server.send(json!({"type": "Update", "data": {"refresh": true}}));
        assert_eq!(recv(&mut updates_a).await, json!({"refresh": true}));
        assert_eq!(recv(&mut updates_b).await, json!({"refresh": true}));

        // b only ever saw the broadcast
        assert!(updates_b.try_recv().is_err());

        eventually(|| {
            let subs = store.subscriptions();
            subs.get("a").unwrap().last_update.is_some()
                && subs.get("b").unwrap().last_update.is_some()
        })
        .await;
    }

    #[tokio::test]
    async fn test_refresh_rebinds_dispatch() {
        let server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let (sub_a, _updates_a, _errors_a) = channel_subscription("a");
        let mut subs = SubscriptionRegistry::new();
        subs.insert(sub_a);
        let ctx = socket
            .subscribe(store.context(), &subs, &SubscribeRequest::new("a", EntityType::Team))
            .await
            .unwrap();

        // c arrives later; without a refresh the socket would not know it
        let (sub_c, mut updates_c, _errors_c) = channel_subscription("c");
        subs.insert(sub_c);
        socket.refresh(&ctx, &subs);

        server.send(json!({"type": "Update", "id": "c", "data": 7}));
        assert_eq!(recv(&mut updates_c).await, json!(7));
    }

    #[tokio::test]
    async fn test_error_frame_reaches_on_error() {
        let server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let (sub, mut updates, mut errors) = channel_subscription("game-3");
        let mut subs = SubscriptionRegistry::new();
        subs.insert(sub);
        socket
            .subscribe(store.context(), &subs, &SubscribeRequest::new("game-3", EntityType::Game))
            .await
            .unwrap();

        server.send(json!({"type": "Error", "id": "game-3", "message": "game locked"}));
        let message = recv(&mut errors).await;
        assert!(message.contains("game locked"));
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_frame_without_id_reaches_everyone() {
        let server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let (sub_a, mut updates_a, mut errors_a) = channel_subscription("a");
        let (sub_b, mut updates_b, mut errors_b) = channel_subscription("b");
        let mut subs = SubscriptionRegistry::new();
        subs.insert(sub_a);
        subs.insert(sub_b);
        socket
            .subscribe(store.context(), &subs, &SubscribeRequest::new("a", EntityType::Team))
            .await
            .unwrap();

        server.send(json!({"type": "Error", "message": "server restarting"}));
        assert_eq!(recv(&mut errors_a).await, "Delivery error: server restarting");
        assert_eq!(recv(&mut errors_b).await, "Delivery error: server restarting");
        assert!(updates_a.try_recv().is_err());
        assert!(updates_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_polo_and_unknown_frames_touch_no_callbacks() {
        let server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let (sub, mut updates, mut errors) = channel_subscription("a");
        let mut subs = SubscriptionRegistry::new();
        subs.insert(sub);
        socket
            .subscribe(store.context(), &subs, &SubscribeRequest::new("a", EntityType::Team))
            .await
            .unwrap();

        server.send(json!({"type": "Polo"}));
        server.send(json!({"type": "Scoreboard", "id": "a", "data": 1}));
        // Frames are handled in order, so this arrives after both
        server.send(json!({"type": "Update", "id": "a", "data": "marker"}));

        assert_eq!(recv(&mut updates).await, json!("marker"));
        assert!(updates.try_recv().is_err());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rehome_reopens_socket_after_server_close() {
        let mut server = TestServer::start().await;
        let store = new_store();
        let sync = MultiModeSync::new(
            store.clone(),
            vec![Arc::new(strategy(&server.url, &store)) as Arc<dyn TransportStrategy>],
        );

        let (update_tx, mut updates) = mpsc::unbounded_channel();
        let on_update: UpdateCallback = Arc::new(move |data: &Value| {
            let _ = update_tx.send(data.clone());
        });
        assert!(
            sync.subscribe(SubscribeRequest::new("a", EntityType::Team), Some(on_update), None)
                .await
        );
        assert_eq!(server.next_frame().await, json!({"type": "subscribed", "id": "a"}));
        let first = sync.context().socket.expect("socket should be open").id();

        server.commands.send(ServerCmd::Close).unwrap();
        eventually(|| store.context().socket.is_none()).await;

        assert_eq!(sync.rehome_orphans().await, 1);
        let ctx = sync.context();
        let reopened = ctx.open_socket().expect("socket should be reopened");
        assert_ne!(reopened.id(), first);
        assert_eq!(ctx.closures, 1);
        assert_eq!(ctx.connection_attempts, 2);
        assert_eq!(server.next_frame().await, json!({"type": "subscribed", "id": "a"}));
        assert_eq!(
            sync.subscriptions().get("a").unwrap().served_by,
            Some(TransportMode::Socket)
        );

        server.send(json!({"type": "Update", "id": "a", "data": 2}));
        assert_eq!(recv(&mut updates).await, json!(2));
        assert_eq!(sync.rehome_orphans().await, 0);
    }

    #[tokio::test]
    async fn test_server_close_clears_socket() {
        let server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let ctx = socket
            .subscribe(
                store.context(),
                &SubscriptionRegistry::new(),
                &SubscribeRequest::new("a", EntityType::Team),
            )
            .await
            .unwrap();
        store.set_context(ctx);

        server.commands.send(ServerCmd::Close).unwrap();

        eventually(|| {
            let ctx = store.context();
            ctx.socket.is_none() && ctx.closures == 1
        })
        .await;
        assert!(store.context().is_viable(TransportMode::Socket));
    }

    #[tokio::test]
    async fn test_closure_limit_bans_socket() {
        let server = TestServer::start().await;
        let store = new_store();
        let config = SocketConfig {
            url: server.url.clone(),
            ready_check_interval: Duration::from_millis(10),
            closure_limit: Some(1),
            ..SocketConfig::default()
        };
        let socket = SocketStrategy::new(config, store.clone());

        let ctx = socket
            .subscribe(
                store.context(),
                &SubscriptionRegistry::new(),
                &SubscribeRequest::new("a", EntityType::Team),
            )
            .await
            .unwrap();
        store.set_context(ctx);

        server.commands.send(ServerCmd::Close).unwrap();

        eventually(|| store.context().banned).await;
        assert!(!store.context().is_viable(TransportMode::Socket));
    }

    #[tokio::test]
    async fn test_unsubscribing_last_closes_socket() {
        let mut server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let (sub, _updates, _errors) = channel_subscription("a");
        let mut subs = SubscriptionRegistry::new();
        subs.insert(sub);
        let ctx = socket
            .subscribe(store.context(), &subs, &SubscribeRequest::new("a", EntityType::Team))
            .await
            .unwrap();
        server.next_frame().await;

        subs.remove("a");
        let ctx = socket.unsubscribe(ctx, &subs, "a").await;

        assert!(ctx.socket.is_none());
        assert_eq!(
            server.next_frame().await,
            json!({"type": "unsubscribed", "id": "a"})
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_without_socket_is_noop() {
        let store = new_store();
        let socket = strategy("ws://127.0.0.1:1", &store);

        let ctx = socket
            .unsubscribe(store.context(), &SubscriptionRegistry::new(), "a")
            .await;
        assert!(ctx.socket.is_none());
        assert_eq!(ctx.connection_attempts, 0);
    }

    #[tokio::test]
    async fn test_publish_sends_update_frame() {
        let mut server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let publication = Publication::new("p-2", EntityType::Player, json!({"goals": 4}));
        let ctx = socket
            .publish(store.context(), &SubscriptionRegistry::new(), &publication)
            .await;

        assert!(ctx.is_some());
        assert_eq!(
            server.next_frame().await,
            json!({"type": "update", "id": "p-2", "dataType": "player", "data": {"goals": 4}})
        );
    }

    #[tokio::test]
    async fn test_close_flushes_queued_frames() {
        let mut server = TestServer::start().await;
        let store = new_store();
        let socket = strategy(&server.url, &store);

        let publication = Publication::new("g-5", EntityType::Game, json!({"final": true}));
        let ctx = socket
            .publish(store.context(), &SubscriptionRegistry::new(), &publication)
            .await
            .unwrap();
        let handle = ctx.socket.clone().unwrap();

        handle.close();
        tokio::time::timeout(WAIT, handle.closed())
            .await
            .expect("socket should finish closing");

        assert_eq!(handle.ready_state(), ReadyState::Closed);
        assert_eq!(server.next_frame().await["id"], json!("g-5"));
        // A requested close is not counted as a closure
        assert_eq!(store.context().closures, 0);
    }
}
