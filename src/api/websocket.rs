//! WebSocket gateway: handshake, admission and the per-connection pumps.

use crate::auth::{Principal, bearer_token};
use crate::error::AuthError;
use crate::realtime::protocol::{ClientEvent, ConnectedPayload};
use crate::realtime::session::apply_client_frame;
use crate::realtime::{
    CONNECTED_EVENT, ChannelTransport, ConnectionState, DisconnectGuard, ERROR_EVENT, Lifecycle,
    Outbound, OutboundQueue, Transport, UNAUTHORIZED_MESSAGE, encode_event,
};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::ws::{
    CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code,
};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, warn};
use utoipa::IntoParams;

/// Close reason sent to connections evicted by a newer session.
const SUPERSEDED_REASON: &str = "superseded by a newer connection";

/// Query parameters accepted on upgrade.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct HandshakeParams {
    /// Bearer token, for clients that cannot set headers.
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The bearer token is taken from the `Authorization` header, the `token`
/// query parameter, or the first `auth` frame, in that order.
#[utoipa::path(
    get,
    path = "/ws",
    params(HandshakeParams),
    responses(
        (status = 101, description = "WebSocket connection established")
    ),
    tag = "WebSocket"
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HandshakeParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .or(params.token);

    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

/// Drives one connection from handshake to cleanup.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    let mut lifecycle = Lifecycle::new();

    let handshake = timeout(
        state.config.auth.handshake_timeout(),
        authenticate(&mut socket, &state, token),
    )
    .await
    .unwrap_or(Err(AuthError::HandshakeTimeout));

    let principal = match handshake {
        Ok(principal) => principal,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake rejected");
            lifecycle.terminate();
            reject(socket).await;
            return;
        }
    };

    let (transport, queue) = ChannelTransport::channel(state.config.realtime.outbound_buffer);
    let user_id = principal.user_id.clone();
    let admission = state
        .registry
        .admit(principal, Arc::new(transport.clone()) as Arc<dyn Transport>);
    let guard = DisconnectGuard::new(Arc::clone(&state.registry), admission.id);
    advance(&mut lifecycle, ConnectionState::Authenticated);

    for evicted in &admission.evicted {
        info!(connection = %evicted.id, user = %user_id, "Evicting superseded connection");
    }
    admission.close_evicted(SUPERSEDED_REASON);

    info!(connection = %admission.id, user = %user_id, "WebSocket client connected");

    let connected = ConnectedPayload {
        connection_id: admission.id.to_string(),
        user_id,
    };
    match encode_event(CONNECTED_EVENT, &connected) {
        Ok(frame) => {
            if let Err(e) = transport.send(Arc::from(frame)) {
                warn!(connection = %admission.id, error = %e, "Failed to queue connected event");
            }
        }
        Err(e) => warn!(connection = %admission.id, error = %e, "Failed to encode connected event"),
    }

    let (sink, mut stream) = socket.split();
    let ping_every = Duration::from_secs(state.config.realtime.ping_interval_secs.max(1));
    let mut writer = tokio::spawn(write_loop(sink, queue, ping_every));
    advance(&mut lifecycle, ConnectionState::Active);

    let registry = Arc::clone(&state.registry);
    let id = guard.id();
    let reader = async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    debug!(connection = %id, "Received frame");
                    apply_client_frame(&registry, id, text.as_str());
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(connection = %id, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {}
    }
    writer.abort();

    advance(&mut lifecycle, ConnectionState::Disconnected);
    drop(guard);
    info!(connection = %id, "WebSocket connection closed");
}

/// Resolves the principal for a new connection.
///
/// Without an upgrade-time token, frames are read until the client sends an
/// `auth` event; anything else before it is ignored.
async fn authenticate(
    socket: &mut WebSocket,
    state: &AppState,
    token: Option<String>,
) -> Result<Principal, AuthError> {
    if let Some(token) = token {
        return state.authenticator.authenticate(Some(&token)).await;
    }

    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(ClientEvent::Auth(payload)) => {
                    return state.authenticator.authenticate(Some(&payload.token)).await;
                }
                Ok(_) | Err(_) => debug!("Ignoring frame before authentication"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    Err(AuthError::MissingToken)
}

/// Sends the `error` event and a policy-violation close frame.
async fn reject(mut socket: WebSocket) {
    if let Ok(frame) = encode_event(ERROR_EVENT, UNAUTHORIZED_MESSAGE) {
        let _ = socket.send(Message::Text(frame.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: Utf8Bytes::from_static(UNAUTHORIZED_MESSAGE),
        })))
        .await;
}

/// Drains the outbound queue into the socket and keeps it alive with pings.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: OutboundQueue,
    ping_every: Duration,
) {
    let mut ping = interval_at(tokio::time::Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = queue.next() => match next {
                Some(Outbound::Frame(frame)) => {
                    if sink.send(Message::Text(frame.as_ref().to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

fn advance(lifecycle: &mut Lifecycle, next: ConnectionState) {
    if let Err(e) = lifecycle.advance(next) {
        warn!(error = %e, "Unexpected connection state change");
    }
}
