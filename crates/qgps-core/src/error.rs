// ── Core error types ──
//
// User-facing errors from qgps-core. Transport failures are translated
// into session-level variants: callers see which setup step failed and
// whether the modem rejected it or simply never answered.

use qgps_api::{MessageId, QmiErrorCode, ServiceId};
use thiserror::Error;

use crate::session::SessionState;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Discovery ────────────────────────────────────────────────────
    #[error("No node on the bus advertises the {service} service")]
    ServiceNotFound { service: ServiceId },

    // ── Request outcomes ─────────────────────────────────────────────
    /// The device rejected the operation, or the transport failed it.
    #[error("{operation} failed: {source}")]
    Protocol {
        operation: String,
        #[source]
        source: qgps_api::Error,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The start request came back with an empty result.
    #[error("Modem rejected start of session {session_id}")]
    StartRejected { session_id: u8 },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: String,
        state: SessionState,
    },

    #[error("Event loop has stopped")]
    LoopStopped,
}

impl CoreError {
    /// Translate a transport-side failure of `operation`.
    pub fn from_transport(operation: impl Into<String>, err: qgps_api::Error) -> Self {
        let operation = operation.into();
        match err {
            qgps_api::Error::RequestTimeout { timeout_ms, .. } => {
                Self::Timeout {
                    operation,
                    timeout_ms,
                }
            }
            qgps_api::Error::LoopStopped => Self::LoopStopped,
            source => Self::Protocol { operation, source },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The QMI error code, when the modem rejected a request.
    pub fn qmi_code(&self) -> Option<QmiErrorCode> {
        match self {
            Self::Protocol { source, .. } => source.qmi_code(),
            _ => None,
        }
    }

    /// The request message that failed, when known.
    pub fn message(&self) -> Option<MessageId> {
        match self {
            Self::Protocol {
                source: qgps_api::Error::Protocol { message, .. },
                ..
            } => Some(*message),
            _ => None,
        }
    }
}
