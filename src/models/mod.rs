//! Payload shapes returned by gateway methods.
//!
//! The gateway owns these structures. The HTTP API forwards them as raw
//! JSON; the typed views here serve the ctl binary and keep everything they
//! do not model in a flattened `extra` map.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{AppError, Result};

pub mod agent;
pub mod cron;
pub mod session;

/// Extract a list from a payload that is either a bare array or an object
/// holding the array under `key`. `null` and a missing key yield an empty list.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the payload has another shape or the
/// items do not deserialize as `T`.
pub fn list_from_payload<T: DeserializeOwned>(payload: Value, key: &str) -> Result<Vec<T>> {
    let items = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Array(_) => payload,
        Value::Object(mut map) => match map.remove(key) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(items) => items,
        },
        other => {
            return Err(AppError::Protocol(format!(
                "expected a list or an object with `{key}`, got {other}"
            )));
        }
    };

    serde_json::from_value(items)
        .map_err(|e| AppError::Protocol(format!("malformed `{key}` list: {e}")))
}
