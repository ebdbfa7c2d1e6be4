use thiserror::Error;

/// Top-level error type for the `tydom-api` crate.
///
/// Covers every failure mode of a single connect attempt or command send:
/// credentials, Digest challenge handling, transport, WebSocket, and cloud.
/// Frame parse failures are not represented here. They travel as data on
/// [`TydomRawMessage`](crate::http_frame::TydomRawMessage).
/// `tydom-core` maps these into resolver decisions and user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Credentials ─────────────────────────────────────────────────
    /// Neither a gateway MAC nor a way to look one up.
    #[error("Missing gateway credentials")]
    MissingCredentials,

    /// Gateway password not configured and no cloud lookup possible.
    #[error("Missing gateway password")]
    MissingPassword,

    // ── Digest challenge ────────────────────────────────────────────
    /// The probe response carried no `WWW-Authenticate` header.
    #[error("Gateway did not return a Digest challenge")]
    MissingChallenge,

    /// The `WWW-Authenticate` header could not be parsed.
    #[error("Invalid Digest challenge: {0}")]
    InvalidChallenge(String),

    /// The challenge asks for a hash algorithm other than MD5.
    #[error("Unsupported Digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The challenge offers a qop list without `auth`.
    #[error("Unsupported Digest qop: {0}")]
    UnsupportedQop(String),

    /// Malformed HTTP during the pre-socket probe.
    #[error("Invalid response from gateway: {0}")]
    InvalidResponse(String),

    // ── Connection ──────────────────────────────────────────────────
    /// Send or ping attempted without a live socket.
    #[error("Not connected to gateway")]
    NotConnected,

    /// Timed out waiting for a reply or for the socket to open.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    // ── Cloud ───────────────────────────────────────────────────────
    /// Cloud login or site lookup failed.
    #[error("Cloud lookup failed: {message}")]
    Cloud { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the gateway rejected or could not be offered
    /// credentials. Retrying the same target will not help.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials
                | Self::MissingPassword
                | Self::MissingChallenge
                | Self::InvalidChallenge(_)
                | Self::UnsupportedAlgorithm(_)
                | Self::UnsupportedQop(_)
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::ReceiveFailed(_) | Self::WebSocketConnect(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_errors_are_auth_failures() {
        assert!(Error::MissingChallenge.is_auth_failure());
        assert!(Error::UnsupportedQop("auth-int".into()).is_auth_failure());
        assert!(!Error::NotConnected.is_auth_failure());
    }

    #[test]
    fn receive_failures_are_transient() {
        assert!(Error::ReceiveFailed("timeout".into()).is_transient());
        assert!(!Error::MissingPassword.is_transient());
    }
}
