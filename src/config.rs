//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Environment variable overriding [`GatewayConfig::url`].
pub const GATEWAY_URL_ENV: &str = "OPENCLAW_GATEWAY_URL";

/// Environment variable supplying the gateway auth token.
pub const GATEWAY_TOKEN_ENV: &str = "OPENCLAW_GATEWAY_TOKEN";

/// Keychain service under which the gateway token may be stored.
const KEYRING_SERVICE: &str = "gateway-console";

/// Client descriptor announced in the `connect` handshake request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ClientIdentity {
    /// Client identifier.
    pub id: String,
    /// Client version string.
    pub version: String,
    /// Platform the client runs on.
    pub platform: String,
    /// Client mode (`backend` for this process).
    pub mode: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            id: "gateway-client".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            platform: env::consts::OS.into(),
            mode: "backend".into(),
        }
    }
}

/// Gateway endpoint and handshake parameters.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GatewayConfig {
    /// WebSocket endpoint of the gateway.
    pub url: String,
    /// Authentication token sent in the handshake (may be empty).
    pub token: String,
    /// Requested role.
    pub role: String,
    /// Requested capability scopes.
    pub scopes: Vec<String>,
    /// Lowest protocol version this client speaks.
    pub min_protocol: u32,
    /// Highest protocol version this client speaks.
    pub max_protocol: u32,
    /// Client descriptor.
    pub client: ClientIdentity,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".into(),
            token: String::new(),
            role: "operator".into(),
            scopes: vec!["operator.admin".into()],
            min_protocol: 3,
            max_protocol: 3,
            client: ClientIdentity::default(),
        }
    }
}

/// Timeout values (milliseconds) for the gateway connection.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TimeoutConfig {
    /// Per-request response timeout.
    pub rpc_ms: u64,
    /// Bound on the challenge/connect round trip, from socket open.
    pub handshake_ms: u64,
    /// Bound on the whole connect attempt, from dialing to authenticated.
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            rpc_ms: 30_000,
            handshake_ms: 10_000,
            connect_ms: 15_000,
        }
    }
}

impl TimeoutConfig {
    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub fn rpc(&self) -> Duration {
        Duration::from_millis(self.rpc_ms)
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    /// Overall connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

/// Dashboard HTTP API settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct HttpConfig {
    /// Loopback port the API binds to.
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GlobalConfig {
    /// Gateway connection settings.
    pub gateway: GatewayConfig,
    /// Connection timeouts.
    pub timeouts: TimeoutConfig,
    /// Dashboard HTTP API settings.
    pub http: HttpConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `OPENCLAW_GATEWAY_URL` if set and non-empty, then re-validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the overridden URL is invalid.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var(GATEWAY_URL_ENV) {
            if !url.trim().is_empty() {
                debug!(url = %url, "gateway url overridden from environment");
                self.gateway.url = url.trim().to_owned();
            }
        }
        self.validate()
    }

    /// Resolve the gateway token: OS keychain first, then the
    /// `OPENCLAW_GATEWAY_TOKEN` env var, then whatever the TOML file held.
    ///
    /// A missing token is not an error; the gateway decides whether an empty
    /// token is acceptable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain lookup task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        if let Some(token) = load_credential("gateway_token", GATEWAY_TOKEN_ENV).await? {
            self.gateway.token = token;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let url = self.gateway.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "gateway.url must use ws:// or wss://, got '{url}'"
            )));
        }

        if self.gateway.min_protocol > self.gateway.max_protocol {
            return Err(AppError::Config(
                "gateway.min_protocol must not exceed gateway.max_protocol".into(),
            ));
        }

        let t = &self.timeouts;
        if t.rpc_ms == 0 || t.handshake_ms == 0 || t.connect_ms == 0 {
            return Err(AppError::Config(
                "timeouts must be greater than zero".into(),
            ));
        }
        if t.handshake_ms >= t.rpc_ms {
            return Err(AppError::Config(
                "timeouts.handshake_ms must be shorter than timeouts.rpc_ms".into(),
            ));
        }
        if t.handshake_ms > t.connect_ms {
            return Err(AppError::Config(
                "timeouts.handshake_ms must not exceed timeouts.connect_ms".into(),
            ));
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
///
/// Returns `Ok(None)` when neither source has a non-empty value.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<Option<String>> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(keyring::Error::NoEntry) => {
            debug!(key = keyring_key, "no keychain entry, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    Ok(env::var(env_key).ok().filter(|value| !value.is_empty()))
}
