//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// `Clone` so that a single connection outcome can be handed to every
/// caller that waited on the same connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Socket-level failure: refused, reset, closed, or not open at send time.
    Connection(String),
    /// The challenge/connect round trip did not complete in time.
    HandshakeTimeout(String),
    /// A single request received no response in time. Carries the method name.
    RequestTimeout(String),
    /// The gateway answered `ok: false`. Carries its message verbatim.
    Gateway(String),
    /// Undecodable frame or payload.
    Protocol(String),
    /// Caller supplied an unusable request (e.g. an empty method name).
    InvalidRequest(String),
    /// HTTP surface failure (bind, serve).
    Http(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error means the shared connection is gone (as opposed to
    /// one request failing on a healthy connection).
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::HandshakeTimeout(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::HandshakeTimeout(msg) => write!(f, "handshake timeout: {msg}"),
            Self::RequestTimeout(method) => write!(f, "rpc timeout: {method}"),
            Self::Gateway(msg) => write!(f, "gateway: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
