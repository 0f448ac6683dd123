//! HTTP and WebSocket client library for the Price Feed API.
//!
//! This crate provides a typed HTTP client for the backend's REST endpoints
//! and a WebSocket client for subscribing to price rooms.
//!
//! # Example
//!
//! ```no_run
//! use feed_client::{FeedClient, ServerMessage, WsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), feed_client::Error> {
//!     let client = FeedClient::with_base_url("http://localhost:3001")?;
//!     let health = client.health_check().await?;
//!     println!("Status: {}", health.status);
//!
//!     let mut ws = WsClient::connect("ws://localhost:3001/ws", Some("<jwt>")).await?;
//!     ws.subscribe("instrument-price:AAPL").await?;
//!     while let Some(message) = ws.recv().await {
//!         if let ServerMessage::PriceUpdate(update) = message {
//!             println!("{} {}", update.symbol, update.price);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;
mod websocket;

pub use client::{ClientConfig, FeedClient};
pub use error::Error;
pub use types::*;
pub use websocket::{ClientCommand, ServerMessage, WsClient, with_token};
