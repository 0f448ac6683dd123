//! Per-connection session bookkeeping used by the WebSocket gateway.

use super::protocol::ClientEvent;
use super::registry::{ConnectionId, ConnectionRegistry};
use crate::error::RegistryError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifecycle of one connection.
///
/// `Connecting -> Authenticated -> Active -> Disconnected`, with
/// `Connecting -> Disconnected` on a failed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Transport open, handshake pending.
    #[default]
    Connecting,
    /// Principal resolved and admitted to the registry.
    Authenticated,
    /// Serving frames; the room set may change.
    Active,
    /// Terminal.
    Disconnected,
}

impl ConnectionState {
    /// Returns whether moving to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Authenticated)
                | (Self::Connecting, Self::Disconnected)
                | (Self::Authenticated, Self::Active)
                | (Self::Authenticated, Self::Disconnected)
                | (Self::Active, Self::Disconnected)
        )
    }

    /// Returns whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid connection state transition: {from} -> {to}")]
pub struct InvalidTransition {
    /// State before the attempted move.
    pub from: ConnectionState,
    /// Requested state.
    pub to: ConnectionState,
}

/// Tracks the state of one connection.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: ConnectionState,
}

impl Lifecycle {
    /// Starts in [`ConnectionState::Connecting`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Moves to `next`.
    ///
    /// # Errors
    /// Returns [`InvalidTransition`] and keeps the current state if the move
    /// is not allowed.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Moves to [`ConnectionState::Disconnected`] from any non-terminal state.
    pub fn terminate(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

/// Effect of one client frame on an active connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Joined a room.
    Joined(String),
    /// Already a member; nothing changed.
    AlreadyJoined(String),
    /// Left a room.
    Left(String),
    /// Was not a member; nothing changed.
    NotJoined(String),
    /// The registry refused the request.
    Rejected(RegistryError),
    /// Frame was not a client command for this state.
    Ignored,
}

/// Applies a text frame received from an active connection.
///
/// Malformed and out-of-place frames are ignored; they never close the
/// connection.
pub fn apply_client_frame(registry: &ConnectionRegistry, id: ConnectionId, text: &str) -> FrameOutcome {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(connection = %id, error = %e, "Ignoring unrecognised frame");
            return FrameOutcome::Ignored;
        }
    };

    match event {
        ClientEvent::Subscribe(request) => match registry.join(id, &request.room) {
            Ok(true) => {
                info!(connection = %id, room = %request.room, "Subscribed");
                FrameOutcome::Joined(request.room)
            }
            Ok(false) => FrameOutcome::AlreadyJoined(request.room),
            Err(e) => {
                warn!(connection = %id, room = %request.room, error = %e, "Subscribe refused");
                FrameOutcome::Rejected(e)
            }
        },
        ClientEvent::Unsubscribe(request) => {
            if registry.leave(id, &request.room) {
                info!(connection = %id, room = %request.room, "Unsubscribed");
                FrameOutcome::Left(request.room)
            } else {
                FrameOutcome::NotJoined(request.room)
            }
        }
        ClientEvent::Auth(_) => {
            debug!(connection = %id, "Ignoring auth frame on authenticated connection");
            FrameOutcome::Ignored
        }
    }
}

/// Removes a connection from the registry when dropped, however the session
/// ended.
pub struct DisconnectGuard {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl DisconnectGuard {
    /// Guards `id` in `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, id: ConnectionId) -> Self {
        Self { registry, id }
    }

    /// The guarded connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(departed) = self.registry.on_disconnect(self.id) {
            info!(
                connection = %self.id,
                user = %departed.user_id,
                rooms = departed.rooms.len(),
                "Connection removed"
            );
        }
    }
}
