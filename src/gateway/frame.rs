//! Wire frames exchanged with the gateway.
//!
//! Every WebSocket text message is one self-contained JSON object with a
//! `type` discriminator:
//!
//! | `type`  | Direction       | Fields                              |
//! |---------|-----------------|-------------------------------------|
//! | `req`   | client → server | `id`, `method`, `params`            |
//! | `res`   | server → client | `id`, `ok`, `payload` or `error`    |
//! | `event` | server → client | `event`, `payload`                  |
//!
//! Decoding never panics; anything that is not one of the three shapes
//! yields [`AppError::Protocol`] and is dropped by the connection reader.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::GatewayConfig;
use crate::{AppError, Result};

/// Event name the gateway pushes to demand the `connect` handshake.
pub const CHALLENGE_EVENT: &str = "connect.challenge";

/// Method name of the handshake request.
pub const CONNECT_METHOD: &str = "connect";

/// Message used when a failed response carries no error message.
pub const DEFAULT_ERROR_MESSAGE: &str = "Request failed";

/// One gateway frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client request.
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// Server response to a request.
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Unsolicited server event.
    #[serde(rename = "event")]
    Event(EventFrame),
}

/// `{"type":"req", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id.
    pub id: String,
    /// Method name.
    pub method: String,
    /// Method parameters; an empty object when the caller passes none.
    #[serde(default = "empty_object")]
    pub params: Value,
}

/// `{"type":"res", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Correlation id echoed from the request.
    pub id: String,
    /// Success flag. Absent is treated as failure.
    #[serde(default)]
    pub ok: bool,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error detail on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Anything else the gateway attached (codes, details).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `{"type":"event", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    /// Build a request frame. `Value::Null` params are sent as `{}`.
    #[must_use]
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        let params = if params.is_null() {
            empty_object()
        } else {
            params
        };
        Self::Request(RequestFrame {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Build the `connect` handshake request from gateway configuration.
    #[must_use]
    pub fn connect(id: impl Into<String>, config: &GatewayConfig) -> Self {
        let params = ConnectParams::from_config(config);
        // ConnectParams contains only strings, integers and vectors.
        let params = serde_json::to_value(params).unwrap_or_else(|_| empty_object());
        Self::request(id, CONNECT_METHOD, params)
    }

    /// Whether this is the authentication challenge event.
    #[must_use]
    pub fn is_challenge(&self) -> bool {
        matches!(self, Self::Event(ev) if ev.event == CHALLENGE_EVENT)
    }
}

impl ResponseFrame {
    /// Convert into the caller-facing outcome.
    ///
    /// `ok: true` yields the payload (`Value::Null` if absent); `ok: false`
    /// yields [`AppError::Gateway`] with the message passed through verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Gateway`] when the gateway reported failure.
    pub fn into_outcome(self) -> Result<Value> {
        if self.ok {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            let message = self
                .error
                .and_then(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_owned());
            Err(AppError::Gateway(message))
        }
    }
}

/// Parameters of the `connect` handshake request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest supported protocol version.
    pub min_protocol: u32,
    /// Highest supported protocol version.
    pub max_protocol: u32,
    /// Client descriptor.
    pub client: ClientDescriptor,
    /// Requested role.
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Credentials.
    pub auth: ConnectAuth,
    /// Advertised client capabilities. Always empty.
    pub caps: Vec<String>,
}

/// `client` object inside [`ConnectParams`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    /// Client identifier.
    pub id: String,
    /// Client version.
    pub version: String,
    /// Platform.
    pub platform: String,
    /// Mode.
    pub mode: String,
}

/// `auth` object inside [`ConnectParams`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectAuth {
    /// Bearer token; empty when none is configured.
    pub token: String,
}

impl ConnectParams {
    /// Derive handshake parameters from configuration.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            min_protocol: config.min_protocol,
            max_protocol: config.max_protocol,
            client: ClientDescriptor {
                id: config.client.id.clone(),
                version: config.client.version.clone(),
                platform: config.client.platform.clone(),
                mode: config.client.mode.clone(),
            },
            role: config.role.clone(),
            scopes: config.scopes.clone(),
            auth: ConnectAuth {
                token: config.token.clone(),
            },
            caps: Vec::new(),
        }
    }
}

/// Serialize a frame to its wire text.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialization fails.
pub fn encode(frame: &Frame) -> Result<String> {
    serde_json::to_string(frame).map_err(|e| AppError::Protocol(format!("encode failed: {e}")))
}

/// Parse wire text into a frame.
///
/// # Errors
///
/// Returns [`AppError::Protocol`]`("malformed frame: …")` for non-JSON text,
/// a missing or unknown `type`, or missing required fields.
pub fn decode(text: &str) -> Result<Frame> {
    serde_json::from_str(text).map_err(|e| AppError::Protocol(format!("malformed frame: {e}")))
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
