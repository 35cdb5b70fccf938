// ── Core error types ──
//
// User-facing errors from chairlink-core. Consumers never see reqwest or
// tungstenite types directly: the `From<chairlink_api::Error>` impl folds
// transport failures into fetch, stream, auth, and config variants.
//
// A delta for an unknown device is reported as
// `DeltaOutcome::UnknownDevice` and an unrecognized alarm type classifies
// as `Warning`. Neither is an error.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Snapshot / stream ────────────────────────────────────────────
    /// A snapshot or resolution request failed. Never fatal: the previous
    /// state is kept.
    #[error("Fetch failed: {message}")]
    Fetch {
        message: String,
        /// HTTP status code (if the backend answered).
        status: Option<u16>,
    },

    #[error("Broker stream error: {reason}")]
    Stream { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Session is closed")]
    SessionClosed,

    #[error("Session is not open")]
    NotOpen,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Alarm not found: {identifier}")]
    AlarmNotFound { identifier: String },

    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether retrying the same operation later might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { status, .. } => status.is_none_or(|s| s >= 500 || s == 429),
            Self::Stream { .. } => true,
            _ => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<chairlink_api::Error> for CoreError {
    fn from(err: chairlink_api::Error) -> Self {
        match err {
            chairlink_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            chairlink_api::Error::Transport(ref e) => CoreError::Fetch {
                message: if e.is_timeout() {
                    "request timed out".into()
                } else if e.is_connect() {
                    format!("cannot reach backend: {e}")
                } else {
                    e.to_string()
                },
                status: e.status().map(|s| s.as_u16()),
            },
            chairlink_api::Error::Http { status, message } => CoreError::Fetch {
                message: format!("backend returned HTTP {status}: {message}"),
                status: Some(status),
            },
            chairlink_api::Error::Deserialization { message, body: _ } => CoreError::Fetch {
                message: format!("unreadable response: {message}"),
                status: None,
            },
            chairlink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            chairlink_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            chairlink_api::Error::WebSocketConnect(reason) => CoreError::Stream {
                reason: format!("connection failed: {reason}"),
            },
            chairlink_api::Error::WebSocketClosed { code, reason } => CoreError::Stream {
                reason: format!("closed (code {code}): {reason}"),
            },
        }
    }
}
