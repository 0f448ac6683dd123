//! Real-time fan-out: connection registry, rooms and broadcasting.
//!
//! The WebSocket gateway in [`crate::api::websocket`] authenticates a
//! connection, admits it to the [`ConnectionRegistry`] and feeds its client
//! frames through [`session::apply_client_frame`]. Producers such as the
//! price scheduler publish through the [`Broadcaster`], which reads room
//! membership from the registry at call time.

pub mod broadcaster;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

pub use broadcaster::{Broadcaster, BroadcasterStats, PublishReport};
pub use protocol::{
    CONNECTED_EVENT, ClientEvent, ERROR_EVENT, PRICE_UPDATE_EVENT, UNAUTHORIZED_MESSAGE,
    encode_event, room_for_symbol,
};
pub use registry::{ConnectionId, ConnectionRegistry, RegistryPolicy, RegistryStats};
pub use session::{ConnectionState, DisconnectGuard, Lifecycle};
pub use transport::{ChannelTransport, Frame, Outbound, OutboundQueue, Transport};
