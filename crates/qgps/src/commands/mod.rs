//! Command handlers and the context they share.

pub mod config_cmd;
pub mod nodes;
pub mod run;

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use qgps_config::Config;
use qgps_core::{CoreError, EventLoop, SessionConfig};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// Resolved configuration plus the global flags that override it.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
    timeout: Option<Duration>,
}

impl Context {
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let config = match &global.config {
            Some(path) => qgps_config::load_config_from(path)?,
            None => qgps_config::load_config()?,
        };
        let format = match global.output {
            Some(format) => format,
            None => OutputFormat::from_str(&config.defaults.output, true).map_err(|_| {
                CliError::Validation {
                    field: "defaults.output".into(),
                    reason: format!("unknown format '{}'", config.defaults.output),
                }
            })?,
        };
        Ok(Self {
            config,
            format,
            color: output::should_color(global.color),
            quiet: global.quiet,
            timeout: global.timeout,
        })
    }

    /// Session settings from the file, with `--timeout` applied.
    pub fn session_config(&self) -> Result<SessionConfig, CliError> {
        let mut session = self.config.session.to_session_config()?;
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(CliError::Validation {
                    field: "--timeout".into(),
                    reason: "must be greater than zero".into(),
                });
            }
            session.request_timeout = timeout;
        }
        Ok(session)
    }

    /// Start an event loop driving the configured modem.
    pub fn spawn_loop(&self) -> Result<EventLoop, CliError> {
        let modem = self.config.simulator.to_sim_modem();
        EventLoop::spawn(modem.factory())
            .map_err(|err| CoreError::from_transport("start event loop", err).into())
    }
}

/// `--config` when given, otherwise the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(qgps_config::config_path)
}
