//! Config subcommand handlers.

use qgps_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::commands::{self, Context};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = commands::config_path(global);
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let ctx = Context::load(global)?;
            // Surface validation problems before printing.
            ctx.session_config()?;
            let rendered = toml::to_string_pretty(&ctx.config)?;
            output::print_output(rendered.trim_end(), ctx.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            match &global.config {
                Some(explicit) => qgps_config::save_config_to(&Config::default(), explicit)?,
                None => qgps_config::save_config(&Config::default())?,
            }
            tracing::info!(path = %path.display(), "config written");
            output::print_output(
                &format!("Config written to {}", path.display()),
                global.quiet,
            );
            Ok(())
        }
    }
}
