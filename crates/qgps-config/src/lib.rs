//! Shared configuration for qgps.
//!
//! TOML file plus `QGPS_` environment overrides, and translation to
//! `qgps_core::SessionConfig` and the simulated modem the CLI drives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use qgps_api::sim::{FixFeed, Outcome, SimModem};
use qgps_api::{
    EventRegistration, FixRecurrence, LockType, Node, NmeaTypes, OperationMode, RequestKind,
    ServiceId,
};
use qgps_core::{ConfigureOptions, SessionConfig, StartOptions};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// How sessions are brought up.
    #[serde(default)]
    pub session: SessionSection,

    /// The modem the CLI talks to.
    #[serde(default)]
    pub simulator: SimulatorSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "text".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSection {
    pub request_timeout_ms: u64,
    pub discovery_window_ms: u64,
    pub session_id: u8,
    pub report_interval_ms: u64,
    pub intermediate_reports: bool,
    pub fix_recurrence: FixRecurrence,
    /// Event registration names, e.g. `position-report`.
    pub events: Vec<String>,
    /// NMEA sentence types, e.g. `gga`.
    pub nmea_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_mode: Option<OperationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_lock: Option<LockType>,
}

impl Default for SessionSection {
    fn default() -> Self {
        let core = SessionConfig::default();
        Self {
            request_timeout_ms: millis(core.request_timeout),
            discovery_window_ms: millis(core.discovery_window),
            session_id: core.start.session_id,
            report_interval_ms: millis(core.start.report_interval),
            intermediate_reports: core.start.intermediate_reports,
            fix_recurrence: core.start.fix_recurrence,
            events: core.events.names().map(str::to_owned).collect(),
            nmea_types: core
                .configure
                .nmea_types
                .names()
                .map(str::to_owned)
                .collect(),
            operation_mode: None,
            engine_lock: None,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulatorSection {
    /// Whether any node advertises the LOC service.
    pub advertise_gnss: bool,
    /// Node hosting the LOC service.
    pub gnss_node: u32,
    pub gnss_port: u32,
    /// Additional nodes that advertise other services.
    pub extra_nodes: Vec<SimNode>,
    /// Emit synthetic fixes once a session starts.
    pub emit_fixes: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f32,
    /// Answer start requests with an empty result.
    pub reject_start: bool,
    /// Delay before every simulated response.
    pub response_delay_ms: u64,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            advertise_gnss: true,
            gnss_node: 0,
            gnss_port: 7,
            extra_nodes: Vec::new(),
            emit_fixes: true,
            latitude: 52.520_008,
            longitude: 13.404_954,
            altitude: 34.0,
            reject_start: false,
            response_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimNode {
    pub id: u32,
    pub service: u8,
    pub port: u32,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "qgps", "qgps").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("qgps");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path` (missing file is fine) + environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("QGPS_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_names<T>(
    field: &str,
    names: &[String],
    lookup: impl Fn(&str) -> Option<T>,
) -> Result<Vec<T>, ConfigError> {
    names
        .iter()
        .map(|name| {
            lookup(name).ok_or_else(|| ConfigError::Validation {
                field: field.into(),
                reason: format!("unknown name '{name}'"),
            })
        })
        .collect()
}

impl SessionSection {
    pub fn event_mask(&self) -> Result<EventRegistration, ConfigError> {
        let flags = parse_names("session.events", &self.events, EventRegistration::from_name)?;
        Ok(flags
            .into_iter()
            .fold(EventRegistration::empty(), |mask, flag| mask | flag))
    }

    pub fn nmea_mask(&self) -> Result<NmeaTypes, ConfigError> {
        let flags = parse_names("session.nmea_types", &self.nmea_types, NmeaTypes::from_name)?;
        Ok(flags
            .into_iter()
            .fold(NmeaTypes::empty(), |mask, flag| mask | flag))
    }

    /// Build the runtime session configuration.
    pub fn to_session_config(&self) -> Result<SessionConfig, ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Validation {
                field: "session.request_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        let events = self.event_mask()?;
        if events.is_empty() {
            return Err(ConfigError::Validation {
                field: "session.events".into(),
                reason: "at least one event class is required".into(),
            });
        }

        Ok(SessionConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            discovery_window: Duration::from_millis(self.discovery_window_ms),
            events,
            configure: ConfigureOptions {
                operation_mode: self.operation_mode,
                engine_lock: self.engine_lock,
                nmea_types: self.nmea_mask()?,
            },
            start: StartOptions {
                session_id: self.session_id,
                fix_recurrence: self.fix_recurrence,
                intermediate_reports: self.intermediate_reports,
                report_interval: Duration::from_millis(self.report_interval_ms),
            },
        })
    }
}

impl SimulatorSection {
    /// Build the simulated modem described by this section.
    pub fn to_sim_modem(&self) -> SimModem {
        let mut modem = SimModem::new();
        for extra in &self.extra_nodes {
            modem = modem.with_node(Node::new(extra.id).with_service(ServiceId(extra.service), extra.port));
        }
        if self.advertise_gnss {
            modem = modem.with_gnss_node(self.gnss_node, self.gnss_port);
        }
        if self.emit_fixes {
            modem = modem.with_fix_feed(FixFeed::new(self.latitude, self.longitude, self.altitude));
        }

        let delay = Duration::from_millis(self.response_delay_ms);
        for kind in [
            RequestKind::RegisterEvents,
            RequestKind::SetOperationMode,
            RequestKind::SetEngineLock,
            RequestKind::SetNmeaTypes,
            RequestKind::Start,
            RequestKind::Stop,
        ] {
            let outcome = if kind == RequestKind::Start && self.reject_start {
                Outcome::Empty
            } else {
                Outcome::Ok
            };
            modem.respond(kind, outcome, delay);
        }
        modem
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use qgps_api::Request;

    use super::*;

    #[test]
    fn defaults_match_core_defaults() {
        let session = SessionSection::default().to_session_config().unwrap();
        assert_eq!(session, SessionConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[session]
request_timeout_ms = 2500
events = ["position-report", "engine-state"]
nmea_types = ["gga", "rmc"]
operation_mode = "standalone"

[simulator]
gnss_port = 11
reject_start = true
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.simulator.gnss_port, 11);
        assert!(cfg.simulator.reject_start);
        assert_eq!(cfg.defaults.output, "text");

        let session = cfg.session.to_session_config().unwrap();
        assert_eq!(session.request_timeout, Duration::from_millis(2500));
        assert_eq!(
            session.events,
            EventRegistration::POSITION_REPORT | EventRegistration::ENGINE_STATE
        );
        assert_eq!(session.configure.nmea_types, NmeaTypes::GGA | NmeaTypes::RMC);
        assert_eq!(
            session.configure.operation_mode,
            Some(OperationMode::Standalone)
        );
        assert_eq!(session.start.session_id, 2);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.simulator, SimulatorSection::default());
        assert_eq!(cfg.session.session_id, 2);
    }

    #[test]
    fn unknown_event_name_is_rejected() {
        let section = SessionSection {
            events: vec!["nmea".into(), "weather".into()],
            ..SessionSection::default()
        };
        let err = section.to_session_config().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid session.events: unknown name 'weather'"
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let section = SessionSection {
            request_timeout_ms: 0,
            ..SessionSection::default()
        };
        assert!(matches!(
            section.to_session_config(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.session.engine_lock = Some(LockType::None);
        cfg.simulator.extra_nodes.push(SimNode {
            id: 3,
            service: 2,
            port: 1,
        });

        save_config_to(&cfg, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }

    #[test]
    fn simulator_section_builds_modem() {
        let section = SimulatorSection {
            extra_nodes: vec![SimNode {
                id: 5,
                service: 2,
                port: 3,
            }],
            ..SimulatorSection::default()
        };
        let modem = section.to_sim_modem();
        assert!(modem.requests().iter().all(|r| !matches!(r, Request::Stop { .. })));
        assert_eq!(modem.open_devices(), 0);
    }
}
