//! Connection handlers for Courier server.
//!
//! This module validates identities, wires WebSocket connections to broker
//! mailboxes and exposes the stored history.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use courier_core::{now_nanos, Broker, BrokerError, Message};
use courier_store::{MessageStore, StoreError, User, UserError, UserManager};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The message broker.
    pub broker: Broker,
    /// Known users.
    pub users: UserManager,
    /// Accepted message history.
    pub store: MessageStore,
    /// Server configuration.
    pub config: Config,
    /// Process-wide shutdown signal.
    pub token: CancellationToken,
    /// Open WebSocket connections.
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state around a broker.
    #[must_use]
    pub fn new(config: Config, broker: Broker, token: CancellationToken) -> Self {
        Self {
            broker,
            users: UserManager::with_token(token.clone()),
            store: MessageStore::new(),
            config,
            token,
            connections: AtomicUsize::new(0),
        }
    }

    /// Claim a connection slot, unless `max_connections` are already taken.
    fn try_reserve_connection(&self) -> bool {
        let max = self.config.limits.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_connection(&self) {
        self.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// User validation or lookup failed.
    #[error(transparent)]
    User(#[from] UserError),

    /// History could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Connection limit reached.
    #[error("Too many connections")]
    TooManyConnections,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::User(UserError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::User(UserError::Duplicate(_)) => StatusCode::CONFLICT,
            Self::User(UserError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::User(UserError::Cancelled) | Self::TooManyConnections => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Connection query parameters.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    id: String,
    name: String,
    email: String,
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    sender: Option<String>,
}

/// A chat frame sent by a client.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(default)]
    recipient: Option<String>,
    content: String,
}

/// Errors in client frames, reported back on the socket.
#[derive(Debug, Error)]
enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message exceeds {0} bytes")]
    TooLarge(usize),
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.websocket_path, get(ws_handler))
        .route("/messages", get(messages_handler))
        .route("/users/:id", get(user_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until `token` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails to start or the routing loop fails.
pub async fn run_server(config: Config, token: CancellationToken) -> Result<()> {
    let broker = Broker::with_config(config.broker_config(), token.clone());
    let routing = tokio::spawn({
        let broker = broker.clone();
        async move { broker.run().await }
    });

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        tokio::spawn(metrics::mirror_broker(
            broker.clone(),
            Duration::from_millis(config.metrics.interval_ms.max(1)),
            token.clone(),
        ));
    }

    let state = Arc::new(AppState::new(config.clone(), broker.clone(), token.clone()));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Courier server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await?;

    // Routing loop has to be gone before mailboxes are torn down
    broker.shutdown().await;
    routing.await??;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Broker statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "subscribers": state.broker.subscriber_count(),
        "connections": state.connections.load(Ordering::Relaxed),
        "broker": state.broker.stats(),
    }))
}

/// Stored history, optionally filtered by sender.
async fn messages_handler(
    Query(params): Query<HistoryParams>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.store.get_messages(params.sender.as_deref())?;
    Ok(Json(messages))
}

/// Look up a connected user.
async fn user_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.users.get_user(&id)?))
}

/// WebSocket upgrade handler.
///
/// A connection slot and the identity are claimed before the upgrade, so a
/// rejected user never reaches the broker. Both are released if the upgrade
/// fails.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.try_reserve_connection() {
        metrics::record_error("connection_limit");
        return Err(ApiError::TooManyConnections);
    }

    let user = User::new(params.id, params.name, params.email);
    if let Err(e) = state.users.add_user(user.clone()) {
        state.release_connection();
        warn!(user = %user.id, error = %e, "Rejected connection");
        metrics::record_error("user");
        return Err(e.into());
    }

    let failed = (Arc::clone(&state), user.id.clone());
    Ok(ws
        .on_failed_upgrade(move |e| {
            let (state, id) = failed;
            warn!(user = %id, error = %e, "WebSocket upgrade failed");
            let _ = state.users.remove_user(&id);
            state.release_connection();
        })
        .on_upgrade(move |socket| handle_websocket(socket, state, user)))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, user: User) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mailbox, inbox) = state.broker.mailbox();
    state.broker.register(user.id.clone(), mailbox);
    debug!(user = %user.id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            () = state.token.cancelled() => break,

            // Messages routed to this user
            delivered = inbox.recv() => {
                let Ok(msg) = delivered else {
                    debug!(user = %user.id, "Mailbox closed");
                    break;
                };
                let text = match serde_json::to_string(&*msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(user = %user.id, error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
                metrics::record_message("outbound");
            }

            // Frames from the client
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match parse_frame(&text, &user.id, state.config.limits.max_message_size) {
                            Ok(message) => {
                                metrics::record_message("inbound");
                                if let Err(BrokerError::Cancelled) = submit(&state, message).await {
                                    debug!(user = %user.id, "Broker cancelled, closing connection");
                                    break;
                                }
                            }
                            Err(e) => {
                                metrics::record_error("frame");
                                let body = serde_json::json!({ "error": e.to_string() }).to_string();
                                if sender.send(WsMessage::Text(body)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_) | WsMessage::Binary(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!(user = %user.id, "WebSocket stream ended");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(user = %user.id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: release the identity
    state.broker.unregister(&user.id);
    if let Err(e) = state.users.remove_user(&user.id) {
        debug!(user = %user.id, error = %e, "User already removed");
    }
    state.release_connection();

    debug!(user = %user.id, "WebSocket disconnected");
}

/// Turn a client frame into a broker message from `sender`.
///
/// A missing or empty recipient means broadcast. The message is stamped on
/// arrival so the stored copy and the delivered copy carry the same time.
fn parse_frame(text: &str, sender: &str, max_size: usize) -> Result<Message, FrameError> {
    let frame: ClientFrame = serde_json::from_str(text)?;
    if frame.content.len() > max_size {
        return Err(FrameError::TooLarge(max_size));
    }
    let message = match frame.recipient.filter(|r| !r.is_empty()) {
        Some(recipient) => Message::direct(sender, recipient, frame.content),
        None => Message::broadcast(sender, frame.content),
    };
    Ok(message.with_timestamp(now_nanos()))
}

/// Hand a message to the broker and record it once the queue accepts it.
///
/// Every accepted message is stored exactly once, whether or not any mailbox
/// ends up receiving it.
async fn submit(state: &AppState, message: Message) -> Result<(), BrokerError> {
    let record = message.clone();
    state.broker.send(message).await?;
    if let Err(e) = state.store.add_message(&record) {
        warn!(error = %e, "Failed to store message");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame() {
        let msg = parse_frame(r#"{"recipient":"bob","content":"hi"}"#, "alice", 64).unwrap();
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.recipient, "bob");
        assert!(!msg.broadcast);
        assert!(msg.has_timestamp());

        let msg = parse_frame(r#"{"content":"hi all"}"#, "alice", 64).unwrap();
        assert!(msg.broadcast);

        let msg = parse_frame(r#"{"recipient":"","content":"hi all"}"#, "alice", 64).unwrap();
        assert!(msg.broadcast);
    }

    #[test]
    fn test_parse_frame_errors() {
        assert!(matches!(
            parse_frame("not json", "alice", 64),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"content":"toolong"}"#, "alice", 3),
            Err(FrameError::TooLarge(3))
        ));
    }

    fn test_state(max_connections: usize) -> AppState {
        let token = CancellationToken::new();
        let mut config = Config::default();
        config.limits.max_connections = max_connections;
        AppState::new(config, Broker::new(token.clone()), token)
    }

    #[tokio::test]
    async fn test_submit_stores_accepted_broadcast() {
        let state = test_state(4);
        // Nobody is registered, so no mailbox will ever see this broadcast
        let message = parse_frame(r#"{"content":"hi all"}"#, "alice", 64).unwrap();
        let stamped = message.timestamp;
        submit(&state, message).await.unwrap();

        let stored = state.store.get_messages(Some("alice")).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hi all");
        assert_eq!(stored[0].timestamp, stamped);

        state.token.cancel();
        let late = Message::broadcast("alice", "late");
        assert_eq!(submit(&state, late).await, Err(BrokerError::Cancelled));
        assert_eq!(state.store.len(), 1);
    }

    #[test]
    fn test_connection_slots_are_bounded() {
        let state = test_state(2);
        assert!(state.try_reserve_connection());
        assert!(state.try_reserve_connection());
        assert!(!state.try_reserve_connection());
        assert_eq!(state.connections.load(Ordering::Acquire), 2);

        state.release_connection();
        assert!(state.try_reserve_connection());
        assert!(!state.try_reserve_connection());
    }

    #[test]
    fn test_connection_slots_under_contention() {
        let state = Arc::new(test_state(10));
        let claimers: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || (0..10).filter(|_| state.try_reserve_connection()).count())
            })
            .collect();
        let claimed: usize = claimers.into_iter().map(|c| c.join().unwrap()).sum();

        assert_eq!(claimed, 10);
        assert_eq!(state.connections.load(Ordering::Acquire), 10);
    }

    #[test]
    fn test_api_error_status() {
        assert_eq!(
            ApiError::from(UserError::Validation("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(UserError::Duplicate("alice".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(UserError::NotFound("alice".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::TooManyConnections.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_user_handler() {
        let token = CancellationToken::new();
        let broker = Broker::new(token.clone());
        let state = Arc::new(AppState::new(Config::default(), broker, token));
        state
            .users
            .add_user(User::new("alice", "Alice", "alice@example.com"))
            .unwrap();

        assert!(user_handler(Path("alice".into()), State(Arc::clone(&state)))
            .await
            .is_ok());
        let missing = user_handler(Path("bob".into()), State(state)).await;
        assert!(matches!(missing, Err(ApiError::User(UserError::NotFound(_)))));
    }
}
