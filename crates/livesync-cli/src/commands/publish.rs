//! Publish command handler

use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;

use livesync_core::{Config, EntityType};

use crate::output::Output;

/// How long to wait for queued socket frames before exiting
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Publish one local change
pub async fn publish(
    config: &Config,
    id: String,
    entity_type: EntityType,
    data: String,
    output: &Output,
) -> Result<()> {
    let sync = config.build_sync()?;
    if sync.context().modes.is_empty() {
        bail!(
            "No transport configured. Set one with:\n  \
             livesync config set socket_url ws://your-server/live\n  \
             livesync config set update_url https://your-server/api"
        );
    }

    let payload = parse_payload(data);
    let published = sync.publish(&id, entity_type, payload).await;
    sync.shutdown(FLUSH_GRACE).await;

    if !published {
        bail!("Failed to publish update for '{}'", id);
    }

    output.success(&format!("Published {} {}", entity_type, id));
    Ok(())
}

/// Parse DATA as JSON, falling back to a plain string
fn parse_payload(data: String) -> Value {
    serde_json::from_str(&data).unwrap_or(Value::String(data))
}
