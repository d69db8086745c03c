//! `/api/gateway/test` connectivity check.

use axum::extract::State;
use serde_json::{json, Value};

use super::{failure, ok, ApiResponse};
use crate::gateway::GatewayClient;

/// `GET /api/gateway/test`: reports connectivity and the raw `cron.list`
/// payload as proof that requests round-trip.
pub(super) async fn test(State(client): State<GatewayClient>) -> ApiResponse {
    let connected = client.is_connected().await;
    match client.call("cron.list", Value::Null).await {
        Ok(jobs) => ok(json!({ "connected": connected, "jobs": jobs })),
        Err(err) => failure("gateway.test", &err, json!({ "connected": false })),
    }
}
