//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local, Utc};
use serde_json::Value;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Check if output is in JSON mode
    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print an update received for a watched entity
    pub fn print_update(&self, id: &str, data: &Value, received_at: DateTime<Utc>) {
        println!("{}", self.update_line(id, data, received_at));
    }

    fn update_line(&self, id: &str, data: &Value, received_at: DateTime<Utc>) -> String {
        match self.format {
            OutputFormat::Human => format!(
                "[{}] {} {}",
                received_at.with_timezone(&Local).format("%H:%M:%S"),
                id,
                truncate(&data.to_string(), 120)
            ),
            OutputFormat::Json => serde_json::json!({
                "event": "update",
                "id": id,
                "data": data,
                "received_at": received_at.to_rfc3339(),
            })
            .to_string(),
            OutputFormat::Quiet => data.to_string(),
        }
    }

    /// Print an error delivered to a watched entity
    pub fn print_error(&self, id: &str, message: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("⚠ {}: {}", id, message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"event": "error", "id": id, "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr
    pub fn warning(&self, message: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", message);
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
