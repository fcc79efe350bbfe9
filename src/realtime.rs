//! Live-update channel.
//!
//! One websocket per signed-in session. The server pushes JSON frames of the
//! form `{"event": "...", "data": ...}`; the client emits `join_project` /
//! `leave_project` frames of the same shape. Handlers only learn that
//! something changed, payload merging is left to refetches.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::RealtimeSettings;
use crate::error::Result;

pub const TICKET_CREATED: &str = "ticket_created";
pub const TICKET_UPDATED: &str = "ticket_updated";
pub const TICKET_DELETED: &str = "ticket_deleted";
pub const COMMENT_CREATED: &str = "comment_created";
pub const BOARD_UPDATED: &str = "board_updated";
pub const BULK_STATUS_CHANGED: &str = "bulk_status_changed";

/// Every server event the client reacts to.
pub const LIVE_EVENTS: [&str; 6] = [
    TICKET_CREATED,
    TICKET_UPDATED,
    TICKET_DELETED,
    COMMENT_CREATED,
    BOARD_UPDATED,
    BULK_STATUS_CHANGED,
];

const JOIN_PROJECT: &str = "join_project";
const LEAVE_PROJECT: &str = "leave_project";

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;
type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnection attempts exhausted; only an explicit reconnect resumes.
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Started,
    AlreadyConnected,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_event: HashMap<String, Vec<(u64, Handler)>>,
}

struct Shared {
    listeners: Mutex<Listeners>,
    rooms: Mutex<BTreeSet<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    token: Mutex<Option<String>>,
    state: watch::Sender<ConnectionState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let handlers: Vec<Handler> = lock(&self.listeners)
            .by_event
            .get(event)
            .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    fn remove(&self, event: &str, id: u64) -> bool {
        let mut listeners = lock(&self.listeners);
        let Some(entries) = listeners.by_event.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(handler_id, _)| *handler_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.by_event.remove(event);
        }
        removed
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<Frame>(text) {
            Ok(frame) => {
                let handled = self.dispatch(&frame.event, &frame.data);
                debug!(event = %frame.event, handled, "realtime event");
            }
            Err(e) => warn!(error = %e, "ignoring malformed realtime frame"),
        }
    }
}

/// Handle to the live-update channel. Clones share one connection.
#[derive(Clone)]
pub struct RealtimeClient {
    url: String,
    settings: RealtimeSettings,
    shared: Arc<Shared>,
}

impl RealtimeClient {
    pub fn new(url: &str, settings: RealtimeSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: websocket_url(url),
            settings,
            shared: Arc::new(Shared {
                listeners: Mutex::new(Listeners::default()),
                rooms: Mutex::new(BTreeSet::new()),
                outbound: Mutex::new(None),
                task: Mutex::new(None),
                token: Mutex::new(None),
                state,
            }),
        }
    }

    /// Open the connection unless one is already running.
    pub fn connect(&self, token: &str) -> ConnectOutcome {
        let mut task = lock(&self.shared.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return ConnectOutcome::AlreadyConnected;
        }

        *lock(&self.shared.token) = Some(token.to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.shared.outbound) = Some(tx);

        *task = Some(tokio::spawn(run_connection(
            self.url.clone(),
            token.to_string(),
            self.settings.clone(),
            self.shared.clone(),
            rx,
        )));
        ConnectOutcome::Started
    }

    /// Start a fresh attempt cycle with the last token, e.g. after `GaveUp`.
    pub fn reconnect(&self) -> Option<ConnectOutcome> {
        let token = lock(&self.shared.token).clone()?;
        Some(self.connect(&token))
    }

    /// Close the connection and forget every listener and room.
    pub fn disconnect(&self) {
        if let Some(handle) = lock(&self.shared.task).take() {
            handle.abort();
        }
        lock(&self.shared.outbound).take();
        lock(&self.shared.token).take();
        lock(&self.shared.rooms).clear();
        lock(&self.shared.listeners).by_event.clear();
        self.shared.set_state(ConnectionState::Disconnected);
        info!("realtime disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Register a handler for a server event. The handler stays registered
    /// until the returned guard is dropped or the client disconnects.
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.shared.listeners);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners
            .by_event
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            shared: Arc::downgrade(&self.shared),
            event: event.to_string(),
            id,
        }
    }

    /// Unregister the handler behind `subscription`.
    pub fn off(&self, subscription: Subscription) {
        debug!(event = %subscription.event, "removing handler");
        drop(subscription);
    }

    #[cfg(test)]
    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.shared.listeners)
            .by_event
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Deliver an event to local handlers as if the server had pushed it.
    #[cfg(test)]
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        self.shared.dispatch(event, payload)
    }

    fn emit(&self, event: &str, data: Value) {
        let frame = Frame {
            event: event.to_string(),
            data,
        };
        match lock(&self.shared.outbound).as_ref() {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    debug!(event, "connection task gone, dropping frame");
                }
            }
            None => debug!(event, "not connected, dropping frame"),
        }
    }

    fn join_room(&self, project_id: &str) {
        lock(&self.shared.rooms).insert(project_id.to_string());
        self.emit(JOIN_PROJECT, Value::String(project_id.to_string()));
    }

    fn leave_room(&self, project_id: &str) {
        lock(&self.shared.rooms).remove(project_id);
        self.emit(LEAVE_PROJECT, Value::String(project_id.to_string()));
    }

    /// Join a project room for as long as the guard lives.
    pub fn enter_room(&self, project_id: &str) -> RoomGuard {
        self.join_room(project_id);
        RoomGuard {
            client: self.clone(),
            project_id: project_id.to_string(),
        }
    }

    #[cfg(test)]
    pub fn rooms(&self) -> Vec<String> {
        lock(&self.shared.rooms).iter().cloned().collect()
    }
}

/// Registered event handler; dropping it unregisters the handler.
#[must_use = "dropping the subscription unregisters the handler"]
pub struct Subscription {
    shared: Weak<Shared>,
    event: String,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(&self.event, self.id);
        }
    }
}

#[must_use = "dropping the guard leaves the room"]
pub struct RoomGuard {
    client: RealtimeClient,
    project_id: String,
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        self.client.leave_room(&self.project_id);
    }
}

/// Accept `http(s)://` socket URLs from config and turn them into `ws(s)://`.
pub fn websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

async fn open(url: &str, token: &str) -> Result<Socket> {
    let mut request = url.into_client_request()?;
    let value = format!("Bearer {token}")
        .parse()
        .map_err(|e: tungstenite::http::header::InvalidHeaderValue| {
            tungstenite::Error::HttpFormat(e.into())
        })?;
    request.headers_mut().insert(AUTHORIZATION, value);

    let (socket, _response) = connect_async(request).await?;
    Ok(socket)
}

enum PumpEnd {
    Lost,
    Shutdown,
}

async fn run_connection(
    url: String,
    token: String,
    settings: RealtimeSettings,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
) {
    let mut failures: u32 = 0;

    loop {
        shared.set_state(if failures == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting { attempt: failures }
        });

        match open(&url, &token).await {
            Ok(socket) => {
                info!(url = %url, "realtime connected");
                failures = 0;
                shared.set_state(ConnectionState::Connected);
                match pump(socket, &shared, &mut outbound).await {
                    PumpEnd::Shutdown => {
                        shared.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    PumpEnd::Lost => info!("realtime connection lost"),
                }
            }
            Err(e) => warn!(url = %url, error = %e, "realtime connection failed"),
        }

        failures += 1;
        if failures > settings.reconnect_attempts {
            warn!(
                attempts = settings.reconnect_attempts,
                "giving up on realtime reconnection, live updates disabled"
            );
            shared.set_state(ConnectionState::GaveUp);
            return;
        }
        tokio::time::sleep(settings.reconnect_delay()).await;
    }
}

async fn pump(
    socket: Socket,
    shared: &Shared,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
) -> PumpEnd {
    let (mut sink, mut source) = socket.split();

    let rooms: Vec<String> = lock(&shared.rooms).iter().cloned().collect();
    for room in rooms {
        let frame = Frame {
            event: JOIN_PROJECT.to_string(),
            data: Value::String(room),
        };
        if let Err(e) = send_frame(&mut sink, &frame).await {
            warn!(error = %e, "failed to rejoin room");
            return PumpEnd::Lost;
        }
    }

    loop {
        tokio::select! {
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                Some(Ok(Message::Close(reason))) => {
                    debug!(?reason, "server closed realtime connection");
                    return PumpEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "realtime read failed");
                    return PumpEnd::Lost;
                }
                None => return PumpEnd::Lost,
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = send_frame(&mut sink, &frame).await {
                        warn!(error = %e, event = %frame.event, "realtime send failed");
                        return PumpEnd::Lost;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return PumpEnd::Shutdown;
                }
            },
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<()>
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    fn settings(delay_ms: u64, attempts: u32) -> RealtimeSettings {
        RealtimeSettings {
            reconnect_delay_ms: delay_ms,
            reconnect_attempts: attempts,
        }
    }

    fn counter(client: &RealtimeClient, event: &str) -> (Arc<AtomicUsize>, Subscription) {
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = client.on(event, {
            let hits = hits.clone();
            move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });
        (hits, sub)
    }

    #[test]
    fn test_websocket_url_from_http() {
        assert_eq!(websocket_url("http://localhost:3000"), "ws://localhost:3000");
        assert_eq!(websocket_url("https://tms.example.com"), "wss://tms.example.com");
        assert_eq!(websocket_url("ws://host:1"), "ws://host:1");
    }

    #[test]
    fn test_multiple_handlers_are_independent() {
        let client = RealtimeClient::new("ws://127.0.0.1:1", settings(10, 0));
        let (first, first_sub) = counter(&client, TICKET_CREATED);
        let (second, _second_sub) = counter(&client, TICKET_CREATED);

        assert_eq!(client.dispatch(TICKET_CREATED, &Value::Null), 2);
        drop(first_sub);
        assert_eq!(client.dispatch(TICKET_CREATED, &Value::Null), 1);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
        assert_eq!(client.listener_count(TICKET_CREATED), 1);
    }

    #[test]
    fn test_off_removes_only_that_handler() {
        let client = RealtimeClient::new("ws://127.0.0.1:1", settings(10, 0));
        let (hits, sub) = counter(&client, BOARD_UPDATED);
        let (_, _other) = counter(&client, BOARD_UPDATED);

        client.off(sub);
        client.dispatch(BOARD_UPDATED, &Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(client.listener_count(BOARD_UPDATED), 1);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_and_disconnect_clears_listeners() {
        let client = RealtimeClient::new("ws://127.0.0.1:1", settings(60_000, 3));
        let (hits, _sub) = counter(&client, TICKET_UPDATED);
        client.join_room("p-1");

        assert_eq!(client.connect("token"), ConnectOutcome::Started);
        assert_eq!(client.connect("token"), ConnectOutcome::AlreadyConnected);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.listener_count(TICKET_UPDATED), 0);
        assert!(client.rooms().is_empty());

        assert_eq!(client.dispatch(TICKET_UPDATED, &Value::Null), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let client = RealtimeClient::new("ws://127.0.0.1:1", settings(5, 2));
        let mut state = client.watch_state();

        assert_eq!(client.connect("token"), ConnectOutcome::Started);
        tokio::time::timeout(
            Duration::from_secs(10),
            state.wait_for(|s| *s == ConnectionState::GaveUp),
        )
        .await
        .expect("client should give up")
        .unwrap();

        // No further attempts happen on their own; an explicit reconnect starts a new cycle.
        assert_eq!(client.reconnect(), Some(ConnectOutcome::Started));
        client.disconnect();
    }

    #[tokio::test]
    async fn test_joins_rooms_and_delivers_server_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut auth = None;
            let mut socket = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
                auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                Ok(resp)
            })
            .await
            .unwrap();

            let first = socket.next().await.unwrap().unwrap();
            socket
                .send(Message::Text(
                    r#"{"event":"ticket_created","data":{"project_id":"p-1"}}"#.to_string(),
                ))
                .await
                .unwrap();
            // Keep the socket open until the client hangs up.
            while let Some(Ok(_)) = socket.next().await {}
            (auth, first)
        });

        let client = RealtimeClient::new(&format!("http://{addr}"), settings(10, 0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = client.on(TICKET_CREATED, move |payload| {
            let _ = tx.send(payload.clone());
        });
        client.join_room("p-1");
        client.connect("secret");

        let payload = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event should arrive")
            .unwrap();
        assert_eq!(payload["project_id"], "p-1");
        assert!(client.is_connected());

        client.disconnect();
        let (auth, first) = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .expect("server should finish")
            .unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
        let frame: Frame = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(
            frame,
            Frame {
                event: JOIN_PROJECT.to_string(),
                data: Value::String("p-1".to_string()),
            }
        );
    }
}
