//! JSON wire protocol shared by both directions of a connection.
//!
//! Every frame is an envelope `{"event": <name>, "data": <payload>}`.

use crate::error::DeliveryError;
use serde::{Deserialize, Serialize};

/// Server event carrying a new instrument price.
pub const PRICE_UPDATE_EVENT: &str = "price:update";

/// Server event sent before closing a connection that failed to authenticate.
pub const ERROR_EVENT: &str = "error";

/// Server event confirming admission.
pub const CONNECTED_EVENT: &str = "connected";

/// Room topic for instrument prices.
pub const PRICE_ROOM_TOPIC: &str = "instrument-price";

/// Message sent with [`ERROR_EVENT`] on failed authentication.
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

/// Returns the room carrying price updates for `symbol`.
#[must_use]
pub fn room_for_symbol(symbol: &str) -> String {
    format!("{PRICE_ROOM_TOPIC}:{symbol}")
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Join a room.
    Subscribe(RoomRequest),
    /// Leave a room.
    Unsubscribe(RoomRequest),
    /// Supply the handshake credential when it was not sent at upgrade.
    Auth(AuthPayload),
}

/// Payload of `subscribe` / `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoomRequest {
    /// Room name, e.g. `instrument-price:AAPL`.
    pub room: String,
}

/// Payload of `auth`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthPayload {
    /// Bearer token.
    pub token: String,
}

/// Payload of `connected`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// Identifier assigned by the registry.
    pub connection_id: String,
    /// Authenticated user.
    pub user_id: String,
}

#[derive(Serialize)]
struct Envelope<'a, P: Serialize + ?Sized> {
    event: &'a str,
    data: &'a P,
}

/// Encodes one server frame.
///
/// # Errors
/// Returns [`DeliveryError::Encode`] if the payload cannot be serialized.
pub fn encode_event<P: Serialize + ?Sized>(event: &str, data: &P) -> Result<String, DeliveryError> {
    serde_json::to_string(&Envelope { event, data })
        .map_err(|e| DeliveryError::Encode(e.to_string()))
}
