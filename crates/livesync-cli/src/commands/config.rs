//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use livesync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to serialize config")?
            );
        }
        OutputFormat::Quiet => {
            let modes: Vec<_> = config.modes.iter().map(|m| m.as_str()).collect();
            println!("{}", modes.join(","));
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            let modes: Vec<_> = config.modes.iter().map(|m| m.as_str()).collect();
            println!("Configuration:");
            println!("  socket_url: {}", or_unset(config.socket_url.as_deref()));
            println!("  update_url: {}", or_unset(config.update_url.as_deref()));
            println!("  modes:      {}", modes.join(", "));
            println!(
                "  log_file:   {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Socket:");
            println!(
                "  ready_check_interval_ms: {}",
                config.socket.ready_check_interval_ms
            );
            println!("  connect_timeout_ms:      {}", config.socket.connect_timeout_ms);
            println!(
                "  closure_limit:           {}",
                config
                    .socket
                    .closure_limit
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Polling:");
            println!("  initial_delay_ms:   {}", config.polling.initial_delay_ms);
            println!("  interval_ms:        {}", config.polling.interval_ms);
            println!("  request_timeout_ms: {}", config.polling.request_timeout_ms);
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    config.set_value(&key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}
