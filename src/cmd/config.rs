//! Configuration view and scaffolding: `questforge config`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use questforge::config::{DEFAULT_CONFIG_FILE, QuestConfig};

use super::super::ConfigCommands;

pub fn cmd_config(
    config: &QuestConfig,
    config_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let path = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
            if path.exists() {
                println!("# Config file: {}", path.display());
            } else {
                println!("# No config file, showing defaults");
            }
            println!(
                "# API key: {}",
                if config.generation.api_key.is_some() { "set" } else { "not set" }
            );
            println!();
            print!("{}", config.to_toml().context("Failed to render configuration")?);
        }
        Some(ConfigCommands::Init { force }) => {
            let path = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let toml = QuestConfig::default()
                .to_toml()
                .context("Failed to render default configuration")?;
            std::fs::write(path, toml)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
