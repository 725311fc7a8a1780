//! Connection handlers for the Courier server.
//!
//! This module handles the connection lifecycle: upgrade checks, the
//! per-connection event loop and cleanup on disconnect.

use crate::auth::Authenticator;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use courier_core::{ClientEvent, ConnectionId, PresenceRegistry, Relay, Session, UserId};
use courier_gateway::{Hub, Outbox};
use courier_protocol::codec;
use courier_protocol::{
    ClientFrame, Encoding, FrameReader, ProtocolError, ServerFrame, Version, PROTOCOL_VERSION,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay engine.
    pub relay: Relay<Arc<Hub>>,
    /// Connection table and rooms.
    pub hub: Arc<Hub>,
    /// Online users.
    pub presence: Arc<PresenceRegistry>,
    /// Token verifier, when authentication is enabled.
    pub auth: Option<Authenticator>,
    /// Server configuration.
    pub config: Config,
    /// Connection slots reserved by accepted upgrades.
    reserved: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let hub = Arc::new(Hub::new());
        let auth = config
            .auth
            .enabled
            .then(|| Authenticator::new(&config.auth.secret));

        Self {
            relay: Relay::new(Arc::clone(&presence), Arc::clone(&hub)),
            hub,
            presence,
            auth,
            config,
            reserved: AtomicUsize::new(0),
        }
    }

    /// Reserve a connection slot, or `None` if `limits.max_connections` is reached.
    fn try_reserve(self: &Arc<Self>) -> Option<ConnectionPermit> {
        let limit = self.config.limits.max_connections;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionPermit {
            state: Arc::clone(self),
        })
    }
}

/// A held connection slot, released on drop.
struct ConnectionPermit {
    state: Arc<AppState>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.state.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Access token, for clients that cannot send an `Authorization` header.
    pub token: Option<String>,
    /// `json` or `msgpack`.
    pub encoding: Option<String>,
    /// Protocol version the client speaks, e.g. `1.0`.
    pub version: Option<String>,
}

/// Per-connection settings fixed at upgrade time.
#[derive(Debug, Clone)]
struct ConnectionContext {
    encoding: Encoding,
    /// User proven by the token, when authentication is enabled.
    identity: Option<UserId>,
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

    if state.auth.is_none() {
        warn!("Authentication disabled; any client may connect");
    }

    let app = app(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Courier server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "rooms": stats.room_count,
        "memberships": stats.total_memberships,
        "online": state.presence.len(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Response {
    let identity = match &state.auth {
        Some(auth) => match auth.authenticate(&headers, params.token.as_deref()) {
            Ok(claims) => Some(claims.user_id),
            Err(e) => {
                debug!(error = %e, "Upgrade rejected");
                metrics::record_error("auth");
                return e.into_response();
            }
        },
        None => None,
    };

    let encoding = match params.encoding.as_deref() {
        Some(name) => match name.parse::<Encoding>() {
            Ok(encoding) => encoding,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        },
        None => state.config.transport.encoding,
    };

    if let Some(requested) = params.version.as_deref() {
        match requested.parse::<Version>() {
            Ok(version) if version.is_compatible_with(&PROTOCOL_VERSION) => {}
            _ => {
                let message = format!(
                    "Unsupported protocol version {requested}, server speaks {PROTOCOL_VERSION}"
                );
                return (StatusCode::BAD_REQUEST, message).into_response();
            }
        }
    }

    let Some(permit) = state.try_reserve() else {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let ctx = ConnectionContext { encoding, identity };
    let socket_limit = state.config.limits.socket_limit();
    ws.max_message_size(socket_limit)
        .max_frame_size(socket_limit)
        .on_upgrade(move |socket| handle_websocket(socket, state, ctx, permit))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    ctx: ConnectionContext,
    permit: ConnectionPermit,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let mut session = Session::new(connection_id.clone());
    let mut outbox = state.hub.attach(connection_id.clone());

    info!(connection = %connection_id, encoding = ?ctx.encoding, "New client connected");

    let (mut sender, mut receiver) = socket.split();

    let heartbeat_ms = state.config.heartbeat.interval_ms;
    let connected = ServerFrame::connected(
        connection_id.as_str(),
        PROTOCOL_VERSION.major,
        u32::try_from(heartbeat_ms).unwrap_or(u32::MAX),
    );

    if send_frame(&mut sender, ctx.encoding, &connected).await.is_ok() {
        run_connection(
            &state,
            &ctx,
            &mut session,
            &mut sender,
            &mut receiver,
            &mut outbox,
        )
        .await;
    } else {
        error!(connection = %connection_id, "Failed to send connected frame");
    }

    // Disconnect reaches the relay exactly once, whatever ended the loop.
    let outcome = state.relay.dispatch(&mut session, ClientEvent::Disconnect);
    metrics::record_event("disconnect");
    metrics::record_outcome(&outcome);
    metrics::set_users_online(state.presence.len());
    drop(permit);
    state.hub.detach(&connection_id);

    info!(connection = %connection_id, "Client disconnected");
}

/// Drive one connection until it closes, errors or misses its heartbeat.
async fn run_connection(
    state: &Arc<AppState>,
    ctx: &ConnectionContext,
    session: &mut Session,
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    outbox: &mut Outbox,
) {
    let connection_id = session.id().clone();

    let mut heartbeat = tokio::time::interval(Duration::from_millis(
        state.config.heartbeat.interval_ms.max(1),
    ));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut last_seen = Instant::now();

    // MessagePack frames may be split across binary messages
    let max_message_size = state.config.limits.max_message_size;
    let mut reader = FrameReader::new(max_message_size);

    loop {
        tokio::select! {
            biased;

            // Frames queued for this connection by the relay
            Some(frame) = outbox.recv() => {
                if send_frame(sender, ctx.encoding, &frame).await.is_err() {
                    debug!(connection = %connection_id, "Send failed, closing");
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        metrics::record_message(text.len(), "inbound");

                        if text.len() > max_message_size {
                            warn!(connection = %connection_id, size = text.len(), "Message too large, dropped");
                            metrics::record_error("message_too_large");
                            continue;
                        }

                        match codec::decode_json::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(state, ctx, session, frame),
                            Err(e) => {
                                warn!(connection = %connection_id, error = %e, "Malformed frame ignored");
                                metrics::record_error("decode");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        metrics::record_message(data.len(), "inbound");

                        reader.extend(&data);
                        loop {
                            match reader.next_frame::<ClientFrame>() {
                                Ok(Some(frame)) => handle_frame(state, ctx, session, frame),
                                Ok(None) => break,
                                Err(e @ ProtocolError::FrameTooLarge { .. }) => {
                                    warn!(connection = %connection_id, error = %e, "Frame too large, dropped");
                                    metrics::record_error("message_too_large");
                                }
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Malformed frame ignored");
                                    metrics::record_error("decode");
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > timeout {
                    debug!(connection = %connection_id, "Heartbeat timeout");
                    metrics::record_error("heartbeat_timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Apply a decoded frame through the relay.
fn handle_frame(state: &AppState, ctx: &ConnectionContext, session: &mut Session, frame: ClientFrame) {
    if let ClientFrame::Register(user) = &frame {
        if state.config.auth.bind_identity {
            if let Some(identity) = &ctx.identity {
                if identity != user {
                    warn!(
                        connection = %session.id(),
                        user = %user,
                        identity = %identity,
                        "Register for another identity dropped"
                    );
                    metrics::record_error("identity_mismatch");
                    return;
                }
            }
        }
    }

    let start = Instant::now();
    metrics::record_event(frame.event_name());

    let outcome = state.relay.dispatch(session, ClientEvent::from(frame));

    metrics::record_outcome(&outcome);
    metrics::set_users_online(state.presence.len());
    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Send a frame to the WebSocket in the connection's encoding.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    encoding: Encoding,
    frame: &ServerFrame,
) -> Result<()> {
    let data = encoding.encode(frame)?;
    metrics::record_message(data.len(), "outbound");

    let message = if encoding.is_binary() {
        Message::Binary(data.to_vec())
    } else {
        Message::Text(String::from_utf8(data.to_vec())?)
    };
    sender.send(message).await?;
    Ok(())
}
