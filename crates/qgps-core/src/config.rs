// ── Runtime session configuration ──
//
// Describes *how* a session is brought up: timeouts, which indications to
// register for, engine configuration and start parameters. Core never
// reads config files; the CLI builds a `SessionConfig` and hands it in.

use std::time::Duration;

use qgps_api::{EventRegistration, FixRecurrence, LockType, NmeaTypes, OperationMode};

/// Per-request timeout used by every setup step.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long bus discovery waits for nodes to announce themselves.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub request_timeout: Duration,
    pub discovery_window: Duration,
    /// Indication classes enabled by `register_events`.
    pub events: EventRegistration,
    pub configure: ConfigureOptions,
    pub start: StartOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            events: EventRegistration::POSITION_REPORT
                | EventRegistration::GNSS_SATELLITE_INFO
                | EventRegistration::NMEA,
            configure: ConfigureOptions::default(),
            start: StartOptions::default(),
        }
    }
}

/// Engine configuration applied by `configure`.
///
/// Operation mode and engine lock are only sent when set; the NMEA type
/// mask is always sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureOptions {
    pub operation_mode: Option<OperationMode>,
    pub engine_lock: Option<LockType>,
    pub nmea_types: NmeaTypes,
}

impl Default for ConfigureOptions {
    fn default() -> Self {
        Self {
            operation_mode: None,
            engine_lock: None,
            nmea_types: NmeaTypes::GGA
                | NmeaTypes::RMC
                | NmeaTypes::GSV
                | NmeaTypes::GSA
                | NmeaTypes::VTG
                | NmeaTypes::PSTIS,
        }
    }
}

impl ConfigureOptions {
    /// Standalone operation with the engine unlocked.
    pub fn standalone() -> Self {
        Self {
            operation_mode: Some(OperationMode::Standalone),
            engine_lock: Some(LockType::None),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    pub session_id: u8,
    pub fix_recurrence: FixRecurrence,
    pub intermediate_reports: bool,
    /// Minimum interval between position reports.
    pub report_interval: Duration,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            session_id: 2,
            fix_recurrence: FixRecurrence::Periodic,
            intermediate_reports: true,
            report_interval: Duration::from_millis(500),
        }
    }
}
