//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a stable process exit code.

use miette::Diagnostic;
use thiserror::Error;

use qgps_config::ConfigError;
use qgps_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const STATE: i32 = 6;
    pub const TRANSPORT: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Discovery ────────────────────────────────────────────────────
    #[error("No node on the bus advertises the {service} service")]
    #[diagnostic(
        code(qgps::service_not_found),
        help(
            "Check which services the modem exposes with: qgps nodes\n\
             The [simulator] section of the config file defines the bus."
        )
    )]
    ServiceNotFound { service: String },

    // ── Modem responses ──────────────────────────────────────────────
    #[error("{operation} was rejected by the modem: {code}")]
    #[diagnostic(
        code(qgps::rejected),
        help("The engine refused the request. Try another --operation-mode or --engine-lock.")
    )]
    Rejected { operation: String, code: String },

    #[error("Modem refused to start fix session {session_id}")]
    #[diagnostic(
        code(qgps::start_rejected),
        help("The start request returned no result. Check `simulator.reject_start` and the engine lock.")
    )]
    StartRejected { session_id: u8 },

    #[error("{operation} timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(qgps::timeout),
        help("Increase the per-request timeout with --timeout or `session.request_timeout_ms`.")
    )]
    Timeout { operation: String, timeout_ms: u64 },

    // ── Transport ────────────────────────────────────────────────────
    #[error("{operation} failed")]
    #[diagnostic(code(qgps::transport))]
    Transport {
        operation: String,
        #[source]
        source: qgps_api::Error,
    },

    #[error("Event loop has stopped")]
    #[diagnostic(code(qgps::loop_stopped))]
    LoopStopped,

    #[error("Cannot {operation} while session is {state}")]
    #[diagnostic(code(qgps::invalid_state))]
    InvalidState { operation: String, state: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(qgps::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(qgps::config_exists),
        help("Use `qgps config init --force` to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(qgps::config))]
    Config(Box<figment::Error>),

    #[error("Failed to write configuration: {0}")]
    #[diagnostic(code(qgps::config))]
    ConfigWrite(#[from] toml::ser::Error),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode JSON output: {0}")]
    #[diagnostic(code(qgps::json))]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ServiceNotFound { .. } => exit_code::NOT_FOUND,
            Self::Rejected { .. } | Self::StartRejected { .. } => exit_code::REJECTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Transport { .. } | Self::LoopStopped => exit_code::TRANSPORT,
            Self::InvalidState { .. } => exit_code::STATE,
            Self::Validation { .. } | Self::ConfigExists { .. } | Self::Config(_) => {
                exit_code::USAGE
            }
            Self::ConfigWrite(_) | Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ServiceNotFound { service } => Self::ServiceNotFound {
                service: service.to_string(),
            },

            CoreError::Protocol { operation, source } => match source.qmi_code() {
                Some(code) => Self::Rejected {
                    operation,
                    code: code.to_string(),
                },
                None => Self::Transport { operation, source },
            },

            CoreError::Timeout {
                operation,
                timeout_ms,
            } => Self::Timeout {
                operation,
                timeout_ms,
            },

            CoreError::StartRejected { session_id } => Self::StartRejected { session_id },

            CoreError::InvalidState { operation, state } => Self::InvalidState {
                operation,
                state: state.to_string(),
            },

            CoreError::LoopStopped => Self::LoopStopped,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Figment(err) => Self::Config(err),
            ConfigError::Serialization(err) => Self::ConfigWrite(err),
            ConfigError::Io(err) => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use qgps_api::{MessageId, QmiErrorCode, ServiceId};
    use qgps_core::SessionState;

    use super::*;

    #[test]
    fn modem_rejection_keeps_the_qmi_code() {
        let err = CliError::from(CoreError::from_transport(
            "set engine lock",
            qgps_api::Error::Protocol {
                message: MessageId::SET_ENGINE_LOCK,
                code: QmiErrorCode::NOT_SUPPORTED,
            },
        ));
        assert_eq!(err.exit_code(), exit_code::REJECTED);
        assert_eq!(
            err.to_string(),
            "set engine lock was rejected by the modem: not supported (0x005e)"
        );
    }

    #[test]
    fn transport_failures_and_timeouts_have_their_own_codes() {
        let bus = CliError::from(CoreError::from_transport(
            "discover",
            qgps_api::Error::Bus("no socket".into()),
        ));
        assert_eq!(bus.exit_code(), exit_code::TRANSPORT);

        let timeout = CliError::from(CoreError::Timeout {
            operation: "start".into(),
            timeout_ms: 250,
        });
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);
    }

    #[test]
    fn lifecycle_errors_map_to_distinct_codes() {
        let missing = CliError::from(CoreError::ServiceNotFound {
            service: ServiceId::LOC,
        });
        assert_eq!(missing.exit_code(), exit_code::NOT_FOUND);

        let state = CliError::from(CoreError::InvalidState {
            operation: "configure".into(),
            state: SessionState::Unopened,
        });
        assert_eq!(state.exit_code(), exit_code::STATE);
        assert_eq!(state.to_string(), "Cannot configure while session is unopened");
    }

    #[test]
    fn config_validation_is_a_usage_error() {
        let err = CliError::from(ConfigError::Validation {
            field: "session.events".into(),
            reason: "unknown name 'x'".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
