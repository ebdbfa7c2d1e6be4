//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use tydom_config::ConfigError;
use tydom_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to the gateway at {host}")]
    #[diagnostic(
        code(tydom::connection_failed),
        help(
            "Check that the gateway is powered and reachable.\n\
             Host: {host}\n\
             Try: tydom probe --mode remote"
        )
    )]
    ConnectionFailed {
        host: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Could not reach the gateway locally or through the cloud relay")]
    #[diagnostic(
        code(tydom::resolution_failed),
        help(
            "{reason}\n\
             Set the gateway address with: tydom config set host <ip>"
        )
    )]
    ResolutionFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed")]
    #[diagnostic(
        code(tydom::auth_failed),
        help(
            "{message}\n\
             Verify the gateway password or run: tydom config set-password"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(tydom::no_credentials),
        help(
            "Configure the gateway with: tydom config init\n\
             Or pass --mac and --password (TYDOM_MAC / TYDOM_PASSWORD)."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(tydom::not_found),
        help("Run: tydom {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Gateway ──────────────────────────────────────────────────────

    #[error("Gateway error: {message}")]
    #[diagnostic(code(tydom::gateway_error))]
    GatewayError { message: String },

    #[error("Unexpected reply: expected {expected}, got {actual}")]
    #[diagnostic(
        code(tydom::unexpected_reply),
        help("Run with -vv to see the raw frames.")
    )]
    UnexpectedReply { expected: String, actual: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tydom::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(tydom::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: tydom config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(tydom::config))]
    Config(Box<ConfigError>),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(tydom::timeout),
        help("Increase timeout with --timeout or check the gateway's responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(tydom::json), help("Check the JSON body and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ResolutionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: String::new(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { host, reason } => CliError::ConnectionFailed {
                host,
                source: reason.into(),
            },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::MissingGatewayMac | CoreError::MissingPassword => CliError::AuthFailed {
                message: err.to_string(),
            },

            CoreError::ControllerDisconnected => CliError::ConnectionFailed {
                host: "(disconnected)".into(),
                source: "Gateway connection was lost".into(),
            },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::ResolutionFailed { reason } => CliError::ResolutionFailed { reason },

            CoreError::Protocol { message }
            | CoreError::Cloud { message }
            | CoreError::Internal(message) => CliError::GatewayError { message },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_stable_exit_codes() {
        let cases = [
            (CoreError::MissingPassword, exit_code::AUTH),
            (CoreError::Timeout { timeout_secs: 5 }, exit_code::TIMEOUT),
            (CoreError::ControllerDisconnected, exit_code::CONNECTION),
            (
                CoreError::ResolutionFailed {
                    reason: "nothing answered".into(),
                },
                exit_code::CONNECTION,
            ),
            (CoreError::Internal("boom".into()), exit_code::GENERAL),
        ];
        for (err, code) in cases {
            assert_eq!(CliError::from(err).exit_code(), code);
        }
    }

    #[test]
    fn missing_credentials_in_config_is_an_auth_failure() {
        let err = CliError::from(ConfigError::NoCredentials {
            profile: "home".into(),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }
}
