//! Connection handlers for Hubbub server.
//!
//! This module handles the connection lifecycle and translates between wire
//! frames and relay operations.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use hubbub_core::rooms::validate_user_id;
use hubbub_core::{
    ChatEvent, ChatMessage, ConnectionId, EventRouter, Outbound, RelayError, RoomKey, RoomTarget,
    TypingNotice, UserId,
};
use hubbub_protocol::codec::{self, Encoded, WireFormat};
use hubbub_protocol::{codes, Frame, RoomRef, RoomType, PROTOCOL_VERSION};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

type WsSink = SplitSink<WebSocket, Message>;

/// Shared server state.
pub struct AppState {
    /// The relay.
    pub router: EventRouter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            router: EventRouter::with_config(config.router_config()),
            config,
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

/// Serve the relay on an already-bound listener.
///
/// # Errors
///
/// Returns an error if the server stops abnormally.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Hubbub server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "rooms": stats.rooms,
        "online_users": stats.online_users,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Per-connection state owned by the socket task.
struct Session {
    id: ConnectionId,
    user: Option<UserId>,
    /// Encoding for relayed events; fixed by the connect frame.
    format: WireFormat,
    read_buffer: BytesMut,
    last_seen: Instant,
}

impl Session {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            user: None,
            format: WireFormat::default(),
            read_buffer: BytesMut::with_capacity(4096),
            last_seen: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (mut sender, mut receiver) = socket.split();

    let mut session = Session::new(ConnectionId::generate());
    let mut mailbox = match state.router.open(&session.id) {
        Ok(mailbox) => mailbox,
        Err(e) => {
            warn!(connection = %session.id, error = %e, "Rejecting connection");
            metrics::record_error("capacity");
            close_with(&mut sender, close_code::AGAIN, "relay at capacity").await;
            return;
        }
    };

    debug!(connection = %session.id, "WebSocket connected");

    let heartbeat = &state.config.heartbeat;
    let idle_timeout = Duration::from_millis(heartbeat.timeout_ms);
    let mut ticker = tokio::time::interval(Duration::from_millis(heartbeat.interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            // Events routed to this connection
            outbound = mailbox.recv() => {
                let Some(outbound) = outbound else {
                    info!(connection = %session.id, "Outbound buffer closed by relay, disconnecting");
                    close_with(&mut sender, close_code::POLICY, "outbound buffer overflow").await;
                    break;
                };
                if send_frame(&mut sender, session.format, &outbound_frame(&outbound)).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        session.touch();
                        metrics::record_frame(data.len(), "inbound");
                        session.read_buffer.extend_from_slice(&data);
                        if drain_binary(&state, &mut session, &mut sender).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        session.touch();
                        metrics::record_frame(text.len(), "inbound");
                        let reply = match codec::decode_json(&text) {
                            Ok(frame) => handle_frame(&state, &mut session, frame, WireFormat::Json),
                            Err(e) => Some(invalid_frame(&session.id, &e)),
                        };
                        if let Some(reply) = reply {
                            if send_frame(&mut sender, WireFormat::Json, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        session.touch();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.touch();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %session.id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %session.id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %session.id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if session.last_seen.elapsed() > idle_timeout {
                    info!(connection = %session.id, "Heartbeat timeout");
                    close_with(&mut sender, close_code::AWAY, "heartbeat timeout").await;
                    break;
                }
            }
        }
    }

    state.router.unregister(&session.id);
    metrics::set_active_rooms(state.router.room_count());

    debug!(connection = %session.id, "WebSocket disconnected");
}

/// Decode and handle every complete binary frame in the read buffer.
async fn drain_binary(state: &AppState, session: &mut Session, sender: &mut WsSink) -> Result<()> {
    loop {
        match codec::decode_from(&mut session.read_buffer) {
            Ok(Some(frame)) => {
                if let Some(reply) = handle_frame(state, session, frame, WireFormat::MessagePack) {
                    send_frame(sender, WireFormat::MessagePack, &reply).await?;
                }
            }
            Ok(None) => break,
            Err(e) => {
                session.read_buffer.clear();
                let reply = invalid_frame(&session.id, &e);
                return send_frame(sender, WireFormat::MessagePack, &reply).await;
            }
        }
    }

    // A partial frame may not outgrow one message
    if session.read_buffer.len() > state.config.limits.max_message_size {
        warn!(connection = %session.id, buffered = session.read_buffer.len(), "Partial frame too large");
        session.read_buffer.clear();
        let reply = Frame::error(0, codes::INVALID_FRAME, "Partial frame exceeds message size limit");
        send_frame(sender, WireFormat::MessagePack, &reply).await?;
    }

    Ok(())
}

/// Handle a decoded frame, returning the direct reply if there is one.
///
/// `format` is the encoding the frame arrived in; replies use the same one.
fn handle_frame(
    state: &AppState,
    session: &mut Session,
    frame: Frame,
    format: WireFormat,
) -> Option<Frame> {
    trace!(connection = %session.id, frame_type = frame.frame_type().as_str(), "Frame received");

    match frame {
        Frame::Connect { version, user } => Some(connect(state, session, version, user, format)),

        Frame::Join { id, room } => {
            let Some(user) = session.user.clone() else {
                return Some(not_connected(id));
            };

            let result = room_key(&user, &room).and_then(|key| state.router.join(&session.id, key));
            Some(match result {
                Ok(outcome) => {
                    if let Some(evicted) = outcome.evicted {
                        debug!(connection = %session.id, room = %evicted, "Left previous private room");
                    }
                    if outcome.joined {
                        metrics::record_join();
                        metrics::set_active_rooms(state.router.room_count());
                    }
                    Frame::ack(id)
                }
                Err(e) => error_frame(id, &e),
            })
        }

        Frame::Leave { id, room } => {
            let Some(user) = session.user.clone() else {
                return Some(not_connected(id));
            };

            Some(match room_key(&user, &room) {
                Ok(key) => {
                    if state.router.leave(&session.id, &key) {
                        metrics::set_active_rooms(state.router.room_count());
                    }
                    Frame::ack(id)
                }
                Err(e) => error_frame(id, &e),
            })
        }

        Frame::Message {
            id,
            recipient,
            group,
            message_id,
            timestamp,
            content,
            metadata,
        } => {
            let request_id = id.unwrap_or(0);
            let Some(user) = session.user.clone() else {
                return Some(not_connected(request_id));
            };

            let result = RoomTarget::from_parts(&user, recipient.as_deref(), group.as_deref())
                .and_then(|target| {
                    let mut message = ChatMessage::new(target, user, message_id, timestamp, content);
                    message.metadata = metadata;
                    route(state, ChatEvent::Message(message), &session.id)
                });

            match result {
                Ok(()) => id.map(Frame::ack),
                Err(e) => Some(error_frame(request_id, &e)),
            }
        }

        Frame::TypingStart { room } | Frame::TypingStop { room } if session.user.is_none() => {
            debug!(connection = %session.id, room = %room.id, "Typing before connect");
            Some(not_connected(0))
        }

        Frame::TypingStart { room } => typing(state, session, &room, ChatEvent::TypingStart),

        Frame::TypingStop { room } => typing(state, session, &room, ChatEvent::TypingStop),

        Frame::Presence { id, user } => {
            if session.user.is_none() {
                return Some(not_connected(id));
            }
            let online = state.router.is_online(&UserId::new(user.as_str()));
            Some(Frame::PresenceStatus { id, user, online })
        }

        Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

        Frame::Pong { .. } => None,

        other => {
            let frame_type = other.frame_type();
            warn!(connection = %session.id, frame_type = frame_type.as_str(), "Unexpected frame type");
            metrics::record_error("unexpected_frame");
            Some(Frame::error(
                0,
                codes::INVALID_FRAME,
                format!("Unexpected {} frame from client", frame_type.as_str()),
            ))
        }
    }
}

fn connect(
    state: &AppState,
    session: &mut Session,
    version: u8,
    user: String,
    format: WireFormat,
) -> Frame {
    let version = match PROTOCOL_VERSION.negotiate(version) {
        Ok(version) => version,
        Err(e) => {
            metrics::record_error("version");
            return Frame::error(0, codes::UNSUPPORTED_VERSION, e.to_string());
        }
    };

    if let Err(reason) = validate_user_id(&user) {
        return Frame::error(0, codes::INVALID_FRAME, format!("Invalid user id: {reason}"));
    }

    let user = UserId::new(user);
    match state.router.register(&session.id, user.clone()) {
        Ok(_) => {
            info!(connection = %session.id, user = %user, "Connection bound");
            session.user = Some(user);
            session.format = format;
            let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
            Frame::connected(session.id.as_str(), version, heartbeat)
        }
        Err(e) => error_frame(0, &e),
    }
}

fn typing(
    state: &AppState,
    session: &Session,
    room: &RoomRef,
    event: fn(TypingNotice) -> ChatEvent,
) -> Option<Frame> {
    let user = session.user.clone()?;
    let notice = TypingNotice::new(room_target(&user, room), user);
    route(state, event(notice), &session.id)
        .err()
        .map(|e| error_frame(0, &e))
}

/// Dispatch an event and record its outcome.
fn route(state: &AppState, event: ChatEvent, origin: &ConnectionId) -> Result<(), RelayError> {
    let kind = event.kind();
    let start = Instant::now();
    let report = state.router.dispatch(event, origin)?;

    metrics::record_dispatch(kind, &report, start.elapsed().as_secs_f64());
    debug!(
        connection = %origin,
        room = %report.room,
        kind,
        recipients = report.recipients,
        delivered = report.delivered,
        "Dispatched"
    );

    Ok(())
}

/// Address a room from the bound user's point of view.
///
/// For private rooms the wire id is the peer's user id.
fn room_target(user: &UserId, room: &RoomRef) -> RoomTarget {
    match room.kind {
        RoomType::Private => RoomTarget::private(user.clone(), UserId::new(room.id.as_str())),
        RoomType::Group => RoomTarget::group(room.id.as_str()),
    }
}

fn room_key(user: &UserId, room: &RoomRef) -> Result<RoomKey, RelayError> {
    room_target(user, room).resolve()
}

/// Convert a routed event to its wire frame.
fn outbound_frame(outbound: &Outbound) -> Frame {
    match outbound {
        Outbound::NewMessage { room, message } => Frame::NewMessage {
            room: room.to_string(),
            sender: message.sender.to_string(),
            message_id: message.message_id.clone(),
            timestamp: message.timestamp,
            content: message.content.clone(),
            metadata: message.metadata.clone(),
        },
        Outbound::UserTyping { room, user } => Frame::UserTyping {
            user: user.to_string(),
            room: room.to_string(),
        },
        Outbound::UserStopTyping { room } => Frame::UserStopTyping {
            room: room.to_string(),
        },
    }
}

fn error_code(error: &RelayError) -> u16 {
    match error {
        RelayError::AlreadyBound { .. } => codes::ALREADY_BOUND,
        RelayError::UnresolvedRoom(_) => codes::UNRESOLVED_ROOM,
        RelayError::Unbound(_) | RelayError::UnknownConnection(_) => codes::NOT_CONNECTED,
        RelayError::CapacityReached(_) | RelayError::RoomLimitReached(_) => codes::LIMIT_REACHED,
        RelayError::TransportBackpressure(_) | RelayError::DuplicateConnection(_) => codes::INTERNAL,
    }
}

fn error_frame(id: u64, error: &RelayError) -> Frame {
    metrics::record_error("relay");
    Frame::error(id, error_code(error), error.to_string())
}

fn not_connected(id: u64) -> Frame {
    Frame::error(id, codes::NOT_CONNECTED, "Send a connect frame first")
}

fn invalid_frame(connection: &ConnectionId, e: &codec::ProtocolError) -> Frame {
    warn!(connection = %connection, error = %e, "Undecodable frame");
    metrics::record_error("decode");
    Frame::error(0, codes::INVALID_FRAME, e.to_string())
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut WsSink, format: WireFormat, frame: &Frame) -> Result<()> {
    let encoded = format.encode(frame)?;
    metrics::record_frame(encoded.len(), "outbound");

    let message = match encoded {
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
        Encoded::Text(text) => Message::Text(text),
    };
    sender.send(message).await?;
    Ok(())
}

async fn close_with(sender: &mut WsSink, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };
    if let Err(e) = sender.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Close frame not delivered");
    }
}
