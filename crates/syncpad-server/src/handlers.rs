//! Connection handlers for the Syncpad relay.
//!
//! This module handles the connection lifecycle and message routing:
//! identity extraction from the upgrade request, the reader loop, the
//! writer task draining the member's outbound queue, and the shared
//! cleanup path for close, transport error, and heartbeat timeout.

use crate::config::Config;
use crate::heartbeat;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use syncpad_core::{member::generate_conn_id, MemberHandle, Outbound, Registry};
use syncpad_protocol::{ClientMessage, ProtocolError};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The room registry.
    pub registry: Registry,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            registry: Registry::new(),
            config,
        }
    }
}

/// Identity parameters carried in the WebSocket upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Room to join.
    #[serde(rename = "roomId")]
    room_id: Option<String>,
    /// Self-declared display name, used as the participant id.
    username: Option<String>,
}

impl ConnectParams {
    /// Both parameters are required and must be non-empty.
    fn validate(self) -> Option<(String, String)> {
        match (self.room_id, self.username) {
            (Some(room), Some(user)) if !room.is_empty() && !user.is_empty() => Some((room, user)),
            _ => None,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    heartbeat::spawn(state.clone());

    let app = app(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Syncpad relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let ws = ws.max_message_size(state.config.limits.max_message_size);
    ws.on_upgrade(move |socket| handle_websocket(socket, params, state))
}

/// Validate the identity of an upgrade request.
///
/// Accepted connections are counted in the metrics via the returned
/// guard; rejections only count as errors.
fn admit(params: ConnectParams) -> Option<(String, String, ConnectionMetricsGuard)> {
    let Some((room_id, username)) = params.validate() else {
        metrics::record_error("rejected_connection");
        return None;
    };
    Some((room_id, username, ConnectionMetricsGuard::new()))
}

/// Handle a WebSocket connection.
async fn handle_websocket(mut socket: WebSocket, params: ConnectParams, state: Arc<AppState>) {
    let Some((room_id, username, _metrics_guard)) = admit(params) else {
        warn!("Connection rejected: missing roomId or username");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "Missing roomId or username".into(),
            })))
            .await;
        return;
    };

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
    let member = MemberHandle::new(generate_conn_id(), &username, outbox_tx);

    debug!(connection = %member.conn_id(), user = %username, room = %room_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sink, mut stream) = socket.split();

    // Writer task: the single owner of the sink, draining the member's
    // outbound queue. Broadcasts, probes, and the forced close from the
    // heartbeat monitor all arrive here in enqueue order.
    let mut writer = tokio::spawn(async move {
        while let Some(item) = outbox_rx.recv().await {
            let result = match item {
                Outbound::Frame(text) => {
                    metrics::record_message("outbound");
                    sink.send(Message::Text(text.to_string())).await
                }
                Outbound::Ping => sink.send(Message::Ping(Vec::new())).await,
                Outbound::Pong(data) => sink.send(Message::Pong(data)).await,
                Outbound::Close => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: "Heartbeat timeout".into(),
                        })))
                        .await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Register with the room: initial_state to this connection, then the
    // join broadcast to the rest, both under the room lock.
    state.registry.join(&room_id, member.clone());
    metrics::set_active_rooms(state.registry.room_count());

    // Reader loop. Also watches the writer task: when the writer exits
    // (heartbeat eviction or write failure) the reader stops too, so
    // both socket halves drop and the TCP connection is torn down.
    let mut writer_done = false;
    loop {
        tokio::select! {
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            msg = stream.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Text(text)) => route_text(&state, &room_id, &member, &text),
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => route_text(&state, &room_id, &member, &text),
                        Err(_) => {
                            warn!(connection = %member.conn_id(), "Discarding non-UTF-8 binary frame");
                            metrics::record_error("malformed");
                        }
                    },
                    Ok(Message::Pong(_)) => member.set_alive(true),
                    Ok(Message::Ping(data)) => {
                        member.send(Outbound::Pong(data));
                    }
                    Ok(Message::Close(_)) => {
                        debug!(connection = %member.conn_id(), "Received close frame");
                        break;
                    }
                    Err(e) => {
                        warn!(connection = %member.conn_id(), error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: the same idempotent path the heartbeat monitor uses, so
    // racing with a timeout eviction is safe.
    state.registry.leave(&room_id, member.conn_id());
    metrics::set_active_rooms(state.registry.room_count());

    debug!(connection = %member.conn_id(), user = %username, "WebSocket disconnected");

    // Dropping the last handle ends the writer task.
    drop(member);
    if !writer_done {
        let _ = writer.await;
    }
}

/// Route one inbound text frame.
///
/// Malformed payloads and unrecognized types are logged and discarded;
/// the connection always stays open.
fn route_text(state: &AppState, room_id: &str, member: &MemberHandle, raw: &str) {
    metrics::record_message("inbound");

    match ClientMessage::parse(raw) {
        Ok(ClientMessage::CodeUpdate { content }) => {
            let recipients = state.registry.update_document(room_id, member, content);
            metrics::record_document_update();
            debug!(room = %room_id, user = %member.user(), recipients, "Document updated");
        }
        Err(ProtocolError::UnknownType(kind)) => {
            warn!(room = %room_id, user = %member.user(), kind = %kind, "Ignoring unhandled message type");
        }
        Err(e) => {
            warn!(room = %room_id, user = %member.user(), error = %e, "Discarding malformed message");
            metrics::record_error("malformed");
        }
    }
}
