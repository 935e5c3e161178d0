use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use questforge::config::QuestConfig;
use questforge::logging::{self, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "questforge")]
#[command(version, about = "Generate multi-episode tabletop adventures with live progress")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write daily-rolling JSON logs into this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Path to the config file. Defaults to ./questforge.toml when present
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate an adventure locally with a terminal progress display
    Generate {
        /// Story prompt. Read from PROMPT.md when omitted
        prompt: Option<String>,
        /// Campaign setting file
        #[arg(long)]
        setting: Option<PathBuf>,
        /// Writing style file
        #[arg(long)]
        style: Option<PathBuf>,
        /// Output directory (default: adventure-<timestamp>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the web service
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Permissive CORS for a separately served front-end
        #[arg(long)]
        dev: bool,
    },
    /// View or scaffold configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Write a default questforge.toml
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let _log_guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
        dir: cli.log_dir.clone(),
    })?;

    let config = match &cli.command {
        Commands::Config {
            command: Some(ConfigCommands::Init { .. }),
        } => QuestConfig::default(),
        _ => QuestConfig::load(cli.config.as_deref()).context("Failed to load configuration")?,
    };

    match cli.command {
        Commands::Generate {
            prompt,
            setting,
            style,
            output,
        } => {
            let args = cmd::generate::GenerateArgs {
                prompt,
                setting,
                style,
                output,
            };
            cmd::cmd_generate(&config, args, cli.verbose).await?;
        }
        Commands::Serve { host, port, dev } => {
            cmd::cmd_serve(config, host, port, dev).await?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command)?;
        }
    }

    Ok(())
}
