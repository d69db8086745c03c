//! Dashboard JSON API.
//!
//! Thin axum handlers that forward to the gateway through the shared
//! [`GatewayClient`]. A gateway failure is reported as `500` with the error
//! message and an empty result in the usual field, so the dashboard can
//! still render a degraded view.
//!
//! | Route                          | Gateway method        |
//! |--------------------------------|-----------------------|
//! | `GET /health`                  | none                  |
//! | `GET /api/gateway/test`        | connect + `cron.list` |
//! | `GET /api/cron`                | `cron.list`           |
//! | `POST /api/cron`               | `cron.add`            |
//! | `PATCH /api/cron/{id}`         | `cron.update`         |
//! | `DELETE /api/cron/{id}`        | `cron.remove`         |
//! | `GET /api/cron/{id}/runs`      | `cron.runs`           |
//! | `POST /api/cron/run`           | `cron.run`            |
//! | `GET /api/sessions`            | `sessions.list`       |
//! | `GET /api/agents`              | `agents.list` + `agent.identity.get` |

mod agents;
mod cron;
mod gateway;
mod sessions;

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gateway::GatewayClient;
use crate::{AppError, Result};

/// Handler response: status plus JSON body.
type ApiResponse = (StatusCode, Json<Value>);

/// Build the API router over `client`.
pub fn router(client: GatewayClient) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/gateway/test", get(gateway::test))
        .route("/api/cron", get(cron::list).post(cron::add))
        .route("/api/cron/run", post(cron::run))
        .route("/api/cron/{id}", patch(cron::update).delete(cron::remove))
        .route("/api/cron/{id}/runs", get(cron::runs))
        .route("/api/sessions", get(sessions::list))
        .route("/api/agents", get(agents::list))
        .with_state(client)
}

/// Serve the API on `127.0.0.1:<port>` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the listener cannot bind or the server fails.
pub async fn serve(client: GatewayClient, port: u16, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {bind}: {err}")))?;
    serve_listener(listener, client, ct).await
}

/// Serve the API on an already bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails.
pub async fn serve_listener(
    listener: TcpListener,
    client: GatewayClient,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Http(format!("listener has no local address: {err}")))?;
    info!(%local, "dashboard API listening");

    axum::serve(listener, router(client))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("API server error: {err}")))?;

    info!("dashboard API shut down");
    Ok(())
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

/// `500` with `{"error": <message>, ..degraded}`.
///
/// A lost connection is logged at `warn`; a single rejected or timed-out
/// request on a healthy link only at `info`.
fn failure(route: &str, err: &AppError, degraded: Value) -> ApiResponse {
    if err.is_connection_failure() {
        warn!(route, %err, "gateway unreachable");
    } else {
        info!(route, %err, "gateway call failed");
    }
    let mut body = match degraded {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    body.insert("error".into(), Value::String(error_message(err)));
    (StatusCode::INTERNAL_SERVER_ERROR, Json(Value::Object(body)))
}

/// Message shown to API clients. Gateway failures are passed through
/// verbatim, without the category prefix.
fn error_message(err: &AppError) -> String {
    match err {
        AppError::Gateway(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// `{}` is the degraded body for mutating routes.
fn no_result() -> Value {
    json!({})
}
