//! API routes module.

pub mod doc;
pub mod handlers;
pub mod routes;
pub mod websocket;

pub use doc::{ApiDoc, build_app};
pub use routes::create_router;
