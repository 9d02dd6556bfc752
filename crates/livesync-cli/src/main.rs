//! livesync CLI
//!
//! Command-line interface for livesync - watch and publish live updates.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use livesync_core::{Config, EntityType};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "livesync")]
#[command(about = "livesync - live entity updates over WebSocket with HTTP polling fallback")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file to use instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to entities and print updates until Ctrl-C
    Watch {
        /// Entity IDs to watch
        #[arg(required = true)]
        ids: Vec<String>,
        /// Entity type (division, team, player, game, tournament)
        #[arg(short = 't', long = "type")]
        entity_type: EntityType,
    },
    /// Publish a local change
    Publish {
        /// Entity ID
        id: String,
        /// Entity type (division, team, player, game, tournament)
        #[arg(short = 't', long = "type")]
        entity_type: EntityType,
        /// New value as JSON; anything else is sent as a string
        data: String,
    },
    /// Show configured transports
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (socket_url, update_url, modes, log_file, socket.*, polling.*)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work even when the current config is unusable
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Commands::Watch { ids, entity_type } => {
            commands::watch::watch(&config, ids, entity_type, &output).await
        }
        Commands::Publish {
            id,
            entity_type,
            data,
        } => commands::publish::publish(&config, id, entity_type, data, &output).await,
        Commands::Status => commands::status::show(&config, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize logging
///
/// Level comes from LIVESYNC_LOG (default "warn"). Logs go to
/// config.log_file when set, otherwise to stderr.
fn init_logging(config: &Config) {
    let log_level = std::env::var("LIVESYNC_LOG").unwrap_or_else(|_| "warn".to_string());
    let env_filter = EnvFilter::new(format!(
        "livesync_core={},livesync_cli={}",
        log_level, log_level
    ));

    let Some(log_path) = config.log_file.clone() else {
        // Ignore error if already initialized
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", log_path);
}
