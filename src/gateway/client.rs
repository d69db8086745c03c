//! RPC facade over the shared gateway connection.
//!
//! [`GatewayClient`] is what the rest of the application talks to. Build one
//! per process and clone it freely: every clone shares the same
//! [`ConnectionManager`] and [`PendingTable`], so no matter how many handlers
//! call concurrently there is at most one socket and one handshake in flight.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::{GatewayConfig, GlobalConfig, TimeoutConfig};
use crate::gateway::connection::ConnectionManager;
use crate::gateway::frame::Frame;
use crate::gateway::pending::PendingTable;
use crate::{AppError, Result};

/// Authenticated request/response client for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    connection: ConnectionManager,
    pending: PendingTable,
    rpc_timeout: Duration,
}

impl GatewayClient {
    /// Build a client from the global configuration. Does not connect.
    #[must_use]
    pub fn new(config: &GlobalConfig) -> Self {
        Self::with_settings(config.gateway.clone(), config.timeouts.clone())
    }

    /// Build a client from its two configuration sections. Does not connect.
    #[must_use]
    pub fn with_settings(gateway: GatewayConfig, timeouts: TimeoutConfig) -> Self {
        let pending = PendingTable::new();
        let rpc_timeout = timeouts.rpc();
        let connection = ConnectionManager::new(gateway, timeouts, pending.clone());
        Self {
            connection,
            pending,
            rpc_timeout,
        }
    }

    /// Invoke `method` with `params` and wait for its payload.
    ///
    /// Connects and authenticates first if needed. `Value::Null` params are
    /// sent as `{}`. The payload is returned as-is; use
    /// [`call_typed`](Self::call_typed) to deserialize it.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidRequest`] if `method` is empty.
    /// - [`AppError::Connection`] / [`AppError::HandshakeTimeout`] if no
    ///   authenticated connection could be obtained, or it closed before the
    ///   response arrived.
    /// - [`AppError::RequestTimeout`] if no response arrived within the RPC
    ///   timeout. The connection stays up.
    /// - [`AppError::Gateway`] if the gateway answered `ok: false`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if method.trim().is_empty() {
            return Err(AppError::InvalidRequest("method must not be empty".into()));
        }

        self.connection.ensure_connected().await?;

        let id = Uuid::new_v4().to_string();
        let completion = self.pending.register(
            id.clone(),
            self.rpc_timeout,
            AppError::RequestTimeout(method.to_owned()),
        );

        // On failure the completion is dropped here, which clears its entry.
        self.connection.send(&Frame::request(id, method, params))?;
        debug!(method, request_id = completion.id(), "rpc sent");

        completion.wait().await
    }

    /// [`call`](Self::call), then deserialize the payload into `T`.
    ///
    /// # Errors
    ///
    /// Everything [`call`](Self::call) returns, plus [`AppError::Protocol`]
    /// if the payload does not fit `T`.
    pub async fn call_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let payload = self.call(method, params).await?;
        serde_json::from_value(payload)
            .map_err(|e| AppError::Protocol(format!("unexpected payload for {method}: {e}")))
    }

    /// Connect if necessary and report whether the connection is
    /// authenticated and open. Never fails; any error reads as `false`.
    pub async fn is_connected(&self) -> bool {
        match self.connection.ensure_connected().await {
            Ok(()) => self.connection.is_authenticated(),
            Err(err) => {
                debug!(%err, "gateway connectivity check failed");
                false
            }
        }
    }

    /// Tear the connection down. Pending calls fail with a connection-closed
    /// error; the next call reconnects. Idempotent.
    pub fn disconnect(&self) {
        self.connection.teardown();
    }

    /// The underlying connection, for phase inspection, stats and events.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}
