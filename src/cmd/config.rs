//! `projector config`: view and validate the effective configuration.

use anyhow::Result;
use projector::config::ProjectorConfig;

use super::super::ConfigCommands;

pub fn cmd_config(config: &ProjectorConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                for warning in &warnings {
                    println!("warning: {}", warning);
                }
                anyhow::bail!("Configuration has {} problem(s)", warnings.len());
            }
        }
    }
    Ok(())
}
