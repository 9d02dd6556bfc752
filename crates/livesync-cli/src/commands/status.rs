//! Status command handler

use anyhow::Result;

use livesync_core::{Config, TransportMode};

use crate::output::{Output, OutputFormat};

/// Show configured transports and where they point
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let usable = config.usable_modes();

    match output.format {
        OutputFormat::Json => {
            let transports: Vec<_> = config
                .modes
                .iter()
                .map(|mode| {
                    serde_json::json!({
                        "mode": mode,
                        "url": url_for(config, *mode),
                        "usable": usable.contains(mode),
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "transports": transports,
                    "closure_limit": config.socket.closure_limit,
                    "polling_interval_ms": config.polling.interval_ms,
                    "log_file": config.log_file,
                })
            );
        }
        OutputFormat::Quiet => {
            let modes: Vec<_> = usable.iter().map(|m| m.as_str()).collect();
            println!("{}", modes.join(","));
        }
        OutputFormat::Human => {
            println!("livesync Status");
            println!("===============");
            println!();
            println!("Transports (in priority order):");
            if config.modes.is_empty() {
                println!("  (none)");
            }
            for (position, mode) in config.modes.iter().enumerate() {
                let state = if usable.contains(mode) {
                    "ready"
                } else {
                    "no URL configured"
                };
                println!(
                    "  {}. {:<8} {} ({})",
                    position + 1,
                    mode,
                    url_for(config, *mode).unwrap_or("-"),
                    state
                );
            }
            println!();
            println!("Socket:");
            match config.socket.closure_limit {
                Some(limit) => println!("  Disabled after {} unexpected closures", limit),
                None => println!("  Reconnects on next use after a closure"),
            }
            println!();
            println!("Polling:");
            println!("  Every {} ms", config.polling.interval_ms);

            if usable.is_empty() {
                println!();
                println!("No transport is usable. Configure one with:");
                println!("  livesync config set socket_url ws://your-server/live");
                println!("  livesync config set update_url https://your-server/api");
            }
        }
    }

    Ok(())
}

fn url_for(config: &Config, mode: TransportMode) -> Option<&str> {
    match mode {
        TransportMode::Socket => config.socket_url.as_deref(),
        TransportMode::Polling => config.update_url.as_deref(),
    }
}
