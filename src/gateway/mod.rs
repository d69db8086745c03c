//! Gateway RPC client.
//!
//! A request/response channel multiplexed over one persistent, authenticated
//! WebSocket to the gateway.
//!
//! - `frame`: wire frame shapes and JSON encode/decode.
//! - `pending`: correlation-id table of in-flight requests with per-entry timeouts.
//! - `connection`: socket ownership, challenge handshake, teardown.
//! - `client`: the public [`GatewayClient`] facade (`call`, `is_connected`, `disconnect`).

pub mod client;
pub mod connection;
pub mod frame;
pub mod pending;

pub use client::GatewayClient;
pub use connection::{ConnectionManager, ConnectionStats, Phase};
pub use frame::Frame;
pub use pending::{Completion, PendingTable};
