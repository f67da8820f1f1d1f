//! Local stand-in for the remote chat server.
//!
//! Speaks the same JSON text protocol the client expects: members are
//! registered by `setName`, chat actions are relayed to named members, and
//! every membership change is broadcast as a fresh member list plus a system
//! notice.

use std::{collections::BTreeMap, sync::Arc, time::Duration, time::Instant};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use parley_core::{
    ClientAction, MAX_FRAME_BYTES, MAX_NAME_LEN, MediaPayload, ServerFrame, decode_action,
    decode_media, encode_server_frame, has_content,
};
use tokio::{
    net::TcpListener,
    sync::{RwLock, mpsc},
};
use tracing::{debug, error, info, warn};

type ConnectionId = u64;

#[derive(Debug, Clone)]
struct Connection {
    name: Option<String>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct RelayState {
    next_id: ConnectionId,
    // Ordered by id so member lists come out in join order.
    connections: BTreeMap<ConnectionId, Connection>,
}

impl RelayState {
    fn name_of(&self, id: ConnectionId) -> Option<String> {
        self.connections.get(&id).and_then(|conn| conn.name.clone())
    }

    fn members(&self) -> Vec<String> {
        self.connections
            .values()
            .filter_map(|conn| conn.name.clone())
            .collect()
    }

    fn named_recipients(&self) -> Vec<mpsc::UnboundedSender<Message>> {
        self.connections
            .values()
            .filter(|conn| conn.name.is_some())
            .map(|conn| conn.tx.clone())
            .collect()
    }

    fn find_by_name(&self, name: &str) -> Option<(ConnectionId, &Connection)> {
        self.connections
            .iter()
            .find(|(_, conn)| conn.name.as_deref() == Some(name))
            .map(|(id, conn)| (*id, conn))
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<RelayState>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RelayState::default())),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn consume(&mut self, amount: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }
}

/// Media frames are far heavier than text, so they drain the bucket faster.
fn action_cost(action: &ClientAction) -> f64 {
    match action {
        ClientAction::SendMedia { .. } => 6.0,
        _ => 1.0,
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "relay listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES)
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| async move {
            if let Err(err) = handle_socket(state, socket).await {
                warn!("socket session ended with error: {}", err);
            }
        })
}

async fn handle_socket(
    state: AppState,
    socket: axum::extract::ws::WebSocket,
) -> Result<(), String> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Pongs queued by the read half only go out when the write half writes,
    // so idle connections need a periodic ping to stay alive behind proxies.
    const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let connection_id = register_connection(&state, outbound_tx).await;
    info!(connection_id, "connection opened");

    let mut rate_limiter = TokenBucket::new(24.0, 12.0);
    let mut result = Ok(());

    while let Some(next_message) = ws_receiver.next().await {
        let message = match next_message {
            Ok(message) => message,
            Err(err) => {
                result = Err(format!("websocket receive error: {err}"));
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if text.as_str().len() > MAX_FRAME_BYTES {
                    warn!(connection_id, "dropping oversized frame");
                    continue;
                }

                let action = match decode_action(text.as_str()) {
                    Ok(action) => action,
                    Err(err) => {
                        warn!(connection_id, "failed to decode action: {}", err);
                        continue;
                    }
                };

                if !rate_limiter.consume(action_cost(&action)) {
                    warn!(connection_id, action = action.name(), "rate limit exceeded");
                    continue;
                }

                handle_action(&state, connection_id, action).await;
            }
            Message::Close(_) => break,
            Message::Binary(_) => {
                debug!(connection_id, "ignoring binary frame");
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    unregister_connection(&state, connection_id).await;
    send_task.abort();
    info!(connection_id, "connection closed");
    result
}

async fn handle_action(state: &AppState, connection_id: ConnectionId, action: ClientAction) {
    match action {
        ClientAction::SetName { name } => set_name(state, connection_id, &name).await,
        ClientAction::SendPublic { message } => {
            send_public(state, connection_id, &message).await;
        }
        ClientAction::SendPrivate { message, to } => {
            send_private(state, connection_id, &message, &to).await;
        }
        ClientAction::SendMedia { data, file_name } => {
            send_media(state, connection_id, data, &file_name).await;
        }
    }
}

async fn register_connection(
    state: &AppState,
    tx: mpsc::UnboundedSender<Message>,
) -> ConnectionId {
    let mut relay = state.inner.write().await;
    let id = relay.next_id;
    relay.next_id += 1;
    relay.connections.insert(id, Connection { name: None, tx });
    id
}

async fn unregister_connection(state: &AppState, connection_id: ConnectionId) {
    let mut relay = state.inner.write().await;
    let Some(removed) = relay.connections.remove(&connection_id) else {
        return;
    };
    let Some(name) = removed.name else {
        return;
    };
    let members = relay.members();
    let recipients = relay.named_recipients();
    drop(relay);

    info!(connection_id, name = %name, "member left");
    broadcast(&recipients, &ServerFrame::Members(members));
    broadcast(
        &recipients,
        &ServerFrame::System(format!("{name} has left the chat")),
    );
}

async fn set_name(state: &AppState, connection_id: ConnectionId, requested: &str) {
    let name = requested.trim();
    let mut relay = state.inner.write().await;
    let Some(own_tx) = relay.connections.get(&connection_id).map(|c| c.tx.clone()) else {
        return;
    };

    let refusal = if !has_content(name) {
        Some("name must not be empty".to_owned())
    } else if name.chars().count() > MAX_NAME_LEN {
        Some(format!("name must be at most {MAX_NAME_LEN} characters"))
    } else if relay
        .find_by_name(name)
        .is_some_and(|(id, _)| id != connection_id)
    {
        Some(format!("name {name} is already taken"))
    } else {
        None
    };
    if let Some(refusal) = refusal {
        drop(relay);
        send_frame(&own_tx, &ServerFrame::System(refusal));
        return;
    }

    let previous = relay.name_of(connection_id);
    if let Some(conn) = relay.connections.get_mut(&connection_id) {
        conn.name = Some(name.to_owned());
    }
    let members = relay.members();
    let recipients = relay.named_recipients();
    drop(relay);

    let notice = match previous {
        Some(previous) if previous == name => return,
        Some(previous) => format!("{previous} is now known as {name}"),
        None => format!("{name} has joined the chat"),
    };

    info!(connection_id, name = %name, "member named");
    broadcast(&recipients, &ServerFrame::Members(members));
    broadcast(&recipients, &ServerFrame::System(notice));
}

async fn send_public(state: &AppState, connection_id: ConnectionId, message: &str) {
    if !has_content(message) {
        return;
    }
    let relay = state.inner.read().await;
    let Some(sender) = relay.name_of(connection_id) else {
        debug!(connection_id, "public message before setName ignored");
        return;
    };
    let recipients = relay.named_recipients();
    drop(relay);

    broadcast(&recipients, &ServerFrame::Public(format!("{sender}: {message}")));
}

async fn send_private(state: &AppState, connection_id: ConnectionId, message: &str, to: &str) {
    if !has_content(message) {
        return;
    }
    let relay = state.inner.read().await;
    let Some(own) = relay.connections.get(&connection_id).cloned() else {
        return;
    };
    let Some(sender) = own.name else {
        debug!(connection_id, "private message before setName ignored");
        return;
    };

    let to = to.trim();
    let Some((recipient_id, recipient)) = relay.find_by_name(to) else {
        drop(relay);
        send_frame(
            &own.tx,
            &ServerFrame::System(format!("{to} is not in the chat")),
        );
        return;
    };
    let recipient_tx = recipient.tx.clone();
    drop(relay);

    let frame = ServerFrame::Private(format!("{sender} -> {to}: {message}"));
    send_frame(&recipient_tx, &frame);
    if recipient_id != connection_id {
        send_frame(&own.tx, &frame);
    }
}

async fn send_media(state: &AppState, connection_id: ConnectionId, data: String, file_name: &str) {
    let relay = state.inner.read().await;
    let Some(own) = relay.connections.get(&connection_id).cloned() else {
        return;
    };
    if own.name.is_none() {
        debug!(connection_id, "media before setName ignored");
        return;
    }
    let recipients = relay.named_recipients();
    drop(relay);

    let decoded = match decode_media(&data, file_name) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(connection_id, "rejecting media: {}", err);
            send_frame(
                &own.tx,
                &ServerFrame::System(format!("media rejected: {err}")),
            );
            return;
        }
    };

    info!(
        connection_id,
        file_name = %decoded.file_name,
        size_bytes = decoded.bytes.len(),
        "relaying media"
    );
    broadcast(
        &recipients,
        &ServerFrame::Media(MediaPayload {
            data,
            file_name: decoded.file_name,
        }),
    );
}

fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) {
    broadcast(std::slice::from_ref(tx), frame);
}

fn broadcast(recipients: &[mpsc::UnboundedSender<Message>], frame: &ServerFrame) {
    let text = match encode_server_frame(frame) {
        Ok(text) => text,
        Err(err) => {
            error!("failed to serialize {} frame: {}", frame.kind(), err);
            return;
        }
    };

    for tx in recipients {
        let _ = tx.send(Message::Text(text.clone().into()));
    }
}
