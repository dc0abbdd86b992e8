use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{MessageId, ServiceId};

/// Top-level error type for the `qgps-api` crate.
///
/// Covers every failure the transport side can report: device-side
/// rejections, bus and device plumbing, and event loop failures.
/// `qgps-core` maps these into user-facing session errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Protocol ────────────────────────────────────────────────────
    /// The modem answered a request with a QMI error status.
    #[error("QMI request {message} failed: {code}")]
    Protocol { message: MessageId, code: QmiErrorCode },

    /// The transport gave up waiting for a response.
    #[error("QMI request {message} timed out after {timeout_ms}ms")]
    RequestTimeout { message: MessageId, timeout_ms: u64 },

    // ── Transport ───────────────────────────────────────────────────
    /// The QRTR bus could not be created or enumerated.
    #[error("QRTR bus unavailable: {0}")]
    Bus(String),

    /// Opening the QMI device on a node failed.
    #[error("Failed to open device on node {node}: {reason}")]
    DeviceOpen { node: u32, reason: String },

    /// The device refused to allocate a client for a service.
    #[error("Failed to allocate {service} client: {reason}")]
    ClientAllocation { service: ServiceId, reason: String },

    /// A handle the operation needs has not been created yet, or was released.
    #[error("Missing {0} handle")]
    MissingHandle(&'static str),

    /// The device or client was closed while the request was outstanding.
    #[error("Handle closed")]
    Closed,

    // ── Event loop ──────────────────────────────────────────────────
    /// The event loop thread is gone; nothing can be submitted anymore.
    #[error("Event loop has stopped")]
    LoopStopped,

    /// The event loop thread could not be started.
    #[error("Failed to start event loop: {0}")]
    LoopStart(String),

    /// A work item panicked on the event loop thread.
    #[error("Work item failed on the event loop: {0}")]
    WorkFailed(String),

    /// Every completion handle for a request was dropped without firing.
    #[error("Completion dropped without a result")]
    CompletionDropped,
}

impl Error {
    /// Returns `true` if the transport itself gave up on the request.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if this is a rejection reported by the modem.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// The QMI error code, when the modem reported one.
    pub fn qmi_code(&self) -> Option<QmiErrorCode> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

// ── QMI error codes ─────────────────────────────────────────────────

/// QMI protocol error code carried in a response's result TLV.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QmiErrorCode(pub u16);

impl QmiErrorCode {
    pub const MALFORMED_MESSAGE: Self = Self(0x0001);
    pub const NO_MEMORY: Self = Self(0x0002);
    pub const INTERNAL: Self = Self(0x0003);
    pub const ABORTED: Self = Self(0x0004);
    pub const CLIENT_IDS_EXHAUSTED: Self = Self(0x0005);
    pub const INVALID_CLIENT_ID: Self = Self(0x0007);
    pub const NO_EFFECT: Self = Self(0x001A);
    pub const INVALID_ARGUMENT: Self = Self(0x0030);
    pub const NOT_SUPPORTED: Self = Self(0x005E);

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::MALFORMED_MESSAGE => "malformed message",
            Self::NO_MEMORY => "no memory",
            Self::INTERNAL => "internal error",
            Self::ABORTED => "aborted",
            Self::CLIENT_IDS_EXHAUSTED => "client ids exhausted",
            Self::INVALID_CLIENT_ID => "invalid client id",
            Self::NO_EFFECT => "no effect",
            Self::INVALID_ARGUMENT => "invalid argument",
            Self::NOT_SUPPORTED => "not supported",
            _ => return None,
        })
    }
}

impl fmt::Display for QmiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:04x})", self.0),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}

impl fmt::Debug for QmiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QmiErrorCode({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_render_with_name() {
        assert_eq!(
            QmiErrorCode::NOT_SUPPORTED.to_string(),
            "not supported (0x005e)"
        );
        assert_eq!(QmiErrorCode(0x0bad).to_string(), "0x0bad");
    }

    #[test]
    fn protocol_error_exposes_code() {
        let err = Error::Protocol {
            message: MessageId::START,
            code: QmiErrorCode::NO_MEMORY,
        };
        assert!(err.is_protocol());
        assert!(!err.is_timeout());
        assert_eq!(err.qmi_code(), Some(QmiErrorCode::NO_MEMORY));
    }
}
