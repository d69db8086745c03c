//! Agent descriptors (`agents.list`, `agent.identity.get`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One agent known to the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// Agent id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar emoji.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// Model the agent runs on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Overlay an `agent.identity.get` payload onto a listed agent, key by key;
/// identity values win. Either side that is not an object leaves `agent`
/// unchanged.
#[must_use]
pub fn merge_identity(agent: Value, identity: Value) -> Value {
    match (agent, identity) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            base.extend(overlay);
            Value::Object(base)
        }
        (agent, _) => agent,
    }
}
