//! # Price Feed Backend
//!
//! A real-time price broadcast service. A periodic scheduler moves the price
//! of every active instrument by a small random amount, persists the new
//! point and publishes it to the WebSocket clients subscribed to that
//! instrument's room. Built with [Axum](https://crates.io/crates/axum) and
//! documented with [utoipa](https://crates.io/crates/utoipa).
//!
//! ## Key Features
//!
//! - **Authenticated connections**: every WebSocket connection presents a
//!   bearer token at handshake; failures get an `error` event and a close
//!   frame, never a half-open socket.
//!
//! - **Rooms**: clients join and leave named rooms; membership lives in an
//!   explicit registry with a reverse index for unconditional cleanup.
//!
//! - **Isolated fan-out**: one slow or broken connection never blocks delivery
//!   to the rest of a room.
//!
//! - **Pluggable storage**: in-memory by default, PostgreSQL when
//!   `DATABASE_URL` is set.
//!
//! ## Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | HTTP handlers, WebSocket gateway, router and OpenAPI document |
//! | [`auth`] | Token verification and handshake authentication |
//! | [`config`] | TOML configuration |
//! | [`db`] | PostgreSQL pool, migrations and store |
//! | [`error`] | Error taxonomy and API error responses |
//! | [`models`] | Domain types and response DTOs |
//! | [`realtime`] | Registry, broadcaster, wire protocol and transports |
//! | [`simulation`] | Price mutation scheduler |
//! | [`state`] | Application state wiring |
//! | [`store`] | Collaborator traits and the in-memory store |
//!
//! ## API Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/ws` | WebSocket upgrade |
//! | GET | `/api/v1/instruments` | Active instruments with last price |
//! | GET | `/api/v1/instruments/{symbol}/history` | Recent price points |
//! | GET | `/api/v1/realtime/stats` | Connections, rooms and counters |
//!
//! ## WebSocket Protocol
//!
//! Frames are JSON envelopes `{"event": ..., "data": ...}`.
//!
//! | Direction | Event | Data |
//! |-----------|-------|------|
//! | client → server | `auth` | `{ "token": string }` |
//! | client → server | `subscribe` | `{ "room": string }` |
//! | client → server | `unsubscribe` | `{ "room": string }` |
//! | server → client | `connected` | `{ "connectionId", "userId" }` |
//! | server → client | `price:update` | `{ "instrumentId", "symbol", "price", "timestamp" }` |
//! | server → client | `error` | `"Unauthorized"` |
//!
//! Price updates for `AAPL` go to room `instrument-price:AAPL`.
//!
//! ## Example Usage
//!
//! ```bash
//! # Development mode with the built-in configuration
//! cargo run
//!
//! # With a configuration file and PostgreSQL
//! CONFIG_PATH=config/default.toml DATABASE_URL=postgres://localhost/prices cargo run
//! ```
//!
//! ```text
//! ws://localhost:3001/ws?token=<jwt>
//! > {"event":"subscribe","data":{"room":"instrument-price:AAPL"}}
//! < {"event":"price:update","data":{"instrumentId":"...","symbol":"AAPL","price":150.75,"timestamp":"..."}}
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod realtime;
pub mod simulation;
pub mod state;
pub mod store;
