//! Conversation sessions (`sessions.list`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// One agent conversation session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    /// Session id (or key, on gateways that use one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Owning agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Creation timestamp as reported by the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Last activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<String>,
    /// Topic line, typically the first user message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Number of messages exchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<Number>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionEntry {
    /// Most recent known activity time, falling back to start and creation.
    #[must_use]
    pub fn last_seen(&self) -> Option<&str> {
        self.last_active_at
            .as_deref()
            .or(self.started_at.as_deref())
            .or(self.timestamp.as_deref())
    }
}
