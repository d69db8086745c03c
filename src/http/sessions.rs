//! `/api/sessions` handler.

use axum::extract::State;
use serde_json::{json, Value};

use super::{failure, ok, ApiResponse};
use crate::gateway::GatewayClient;
use crate::models::list_from_payload;

/// `GET /api/sessions`
pub(super) async fn list(State(client): State<GatewayClient>) -> ApiResponse {
    match client
        .call("sessions.list", Value::Null)
        .await
        .and_then(|payload| list_from_payload::<Value>(payload, "sessions"))
    {
        Ok(sessions) => ok(json!({ "sessions": sessions })),
        Err(err) => failure("sessions.list", &err, json!({ "sessions": [] })),
    }
}
