//! `/api/cron` handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{failure, no_result, ok, ApiResponse};
use crate::gateway::GatewayClient;
use crate::models::list_from_payload;

/// Default `limit` for run history.
const DEFAULT_RUNS_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
pub(super) struct RunsQuery {
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RunBody {
    id: String,
}

/// `GET /api/cron`: jobs are passed through exactly as the gateway sent them.
pub(super) async fn list(State(client): State<GatewayClient>) -> ApiResponse {
    match client
        .call("cron.list", Value::Null)
        .await
        .and_then(|payload| list_from_payload::<Value>(payload, "jobs"))
    {
        Ok(jobs) => ok(json!({ "jobs": jobs })),
        Err(err) => failure("cron.list", &err, json!({ "jobs": [] })),
    }
}

/// `POST /api/cron`: body is forwarded to `cron.add` unchanged.
pub(super) async fn add(
    State(client): State<GatewayClient>,
    Json(body): Json<Value>,
) -> ApiResponse {
    match client.call("cron.add", body).await {
        Ok(result) => ok(json!({ "result": result })),
        Err(err) => failure("cron.add", &err, no_result()),
    }
}

/// `PATCH /api/cron/{id}`
pub(super) async fn update(
    State(client): State<GatewayClient>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> ApiResponse {
    match client
        .call("cron.update", json!({ "id": id, "patch": patch }))
        .await
    {
        Ok(result) => ok(json!({ "result": result })),
        Err(err) => failure("cron.update", &err, no_result()),
    }
}

/// `DELETE /api/cron/{id}`
pub(super) async fn remove(
    State(client): State<GatewayClient>,
    Path(id): Path<String>,
) -> ApiResponse {
    match client.call("cron.remove", json!({ "id": id })).await {
        Ok(result) => ok(json!({ "result": result })),
        Err(err) => failure("cron.remove", &err, no_result()),
    }
}

/// `GET /api/cron/{id}/runs?limit=N`
pub(super) async fn runs(
    State(client): State<GatewayClient>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> ApiResponse {
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    let outcome = client
        .call("cron.runs", json!({ "id": id, "limit": limit }))
        .await
        .and_then(|payload| list_from_payload::<Value>(payload, "runs"));

    match outcome {
        Ok(runs) => ok(json!({ "runs": runs })),
        Err(err) => failure("cron.runs", &err, json!({ "runs": [] })),
    }
}

/// `POST /api/cron/run` with `{"id": ...}`: forces an immediate run.
pub(super) async fn run(
    State(client): State<GatewayClient>,
    Json(body): Json<RunBody>,
) -> ApiResponse {
    match client
        .call("cron.run", json!({ "id": body.id, "mode": "force" }))
        .await
    {
        Ok(result) => ok(json!({ "result": result })),
        Err(err) => failure("cron.run", &err, no_result()),
    }
}
