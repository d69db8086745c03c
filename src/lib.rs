#![forbid(unsafe_code)]

//! `gateway-console` — backend of a monitoring console for an agent gateway.
//!
//! The core is [`gateway::GatewayClient`]: one authenticated WebSocket to the
//! gateway, shared by every caller, with correlation-id multiplexing and
//! per-request timeouts. [`http`] exposes the dashboard's JSON API on top of
//! it.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod http;
pub mod models;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use gateway::GatewayClient;
