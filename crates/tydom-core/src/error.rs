// ── Core error types ──
//
// User-facing errors from tydom-core. Digest and transport details are
// folded into a handful of domain variants by the `From<tydom_api::Error>`
// impl; the resolver uses `is_auth_failure` to decide whether a fallback
// target is worth trying.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to gateway at {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Gateway disconnected")]
    ControllerDisconnected,

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Resolution errors ────────────────────────────────────────────
    #[error("Gateway MAC address is not known and cloud lookup is disabled")]
    MissingGatewayMac,

    #[error("Gateway password is not known and cloud lookup is disabled")]
    MissingPassword,

    #[error("Could not reach the gateway: {reason}")]
    ResolutionFailed { reason: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Gateway protocol error: {message}")]
    Protocol { message: String },

    #[error("Cloud error: {message}")]
    Cloud { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::MissingGatewayMac | Self::MissingPassword
        )
    }

    /// Worth retrying later without changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::ControllerDisconnected
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tydom_api::Error> for CoreError {
    fn from(err: tydom_api::Error) -> Self {
        use tydom_api::Error as Api;

        match err {
            Api::MissingCredentials => CoreError::MissingGatewayMac,
            Api::MissingPassword => CoreError::MissingPassword,
            e @ (Api::MissingChallenge
            | Api::InvalidChallenge(_)
            | Api::UnsupportedAlgorithm(_)
            | Api::UnsupportedQop(_)) => CoreError::AuthenticationFailed {
                message: e.to_string(),
            },
            Api::InvalidResponse(reason) => CoreError::ConnectionFailed {
                host: String::new(),
                reason,
            },
            Api::NotConnected => CoreError::ControllerDisconnected,
            Api::ReceiveFailed(reason) => CoreError::ConnectionFailed {
                host: String::new(),
                reason: format!("receive failed: {reason}"),
            },
            Api::Transport(ref e) if e.is_timeout() => CoreError::Timeout { timeout_secs: 0 },
            Api::Transport(e) => CoreError::ConnectionFailed {
                host: e
                    .url()
                    .and_then(|u| u.host_str().map(str::to_owned))
                    .unwrap_or_default(),
                reason: e.to_string(),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                host: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                host: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            Api::Cloud { message } => CoreError::Cloud { message },
            Api::Deserialization { message, body: _ } => CoreError::Protocol {
                message: format!("Deserialization error: {message}"),
            },
        }
    }
}
