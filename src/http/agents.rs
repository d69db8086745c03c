//! `/api/agents` handler.

use axum::extract::State;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::debug;

use super::{failure, ok, ApiResponse};
use crate::gateway::GatewayClient;
use crate::models::agent::merge_identity;
use crate::models::list_from_payload;

/// `GET /api/agents`: lists agents, then enriches each with its identity.
///
/// Identity lookups run concurrently over the shared connection. An agent
/// whose lookup fails is returned as listed.
pub(super) async fn list(State(client): State<GatewayClient>) -> ApiResponse {
    let agents = match client
        .call("agents.list", Value::Null)
        .await
        .and_then(|payload| list_from_payload::<Value>(payload, "agents"))
    {
        Ok(agents) => agents,
        Err(err) => return failure("agents.list", &err, json!({ "agents": [] })),
    };

    let enriched = join_all(agents.into_iter().map(|agent| enrich(&client, agent))).await;
    ok(json!({ "agents": enriched }))
}

async fn enrich(client: &GatewayClient, agent: Value) -> Value {
    let mut params = json!({});
    if let Some(id) = agent.get("id") {
        params["agentId"] = id.clone();
    }

    match client.call("agent.identity.get", params).await {
        Ok(identity) => merge_identity(agent, identity),
        Err(err) => {
            debug!(agent_id = ?agent.get("id"), %err, "identity lookup failed, keeping agent");
            agent
        }
    }
}
