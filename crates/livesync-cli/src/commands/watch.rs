//! Watch command handler
//!
//! Subscribes on start, prints updates until Ctrl-C, then unsubscribes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use livesync_core::sync::{ErrorCallback, UpdateCallback};
use livesync_core::{Config, EntityType, SubscribeRequest, SyncError};

use crate::output::Output;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Something a subscription callback reported
#[derive(Debug, Clone, PartialEq)]
enum WatchEvent {
    Update {
        id: String,
        data: Value,
        received_at: DateTime<Utc>,
    },
    Error {
        id: String,
        message: String,
    },
}

/// Callbacks that forward into the watch loop
fn forwarding_callbacks(
    id: &str,
    events: &mpsc::UnboundedSender<WatchEvent>,
) -> (UpdateCallback, ErrorCallback) {
    let update_tx = events.clone();
    let update_id = id.to_string();
    let on_update: UpdateCallback = Arc::new(move |data: &Value| {
        let _ = update_tx.send(WatchEvent::Update {
            id: update_id.clone(),
            data: data.clone(),
            received_at: Utc::now(),
        });
    });

    let error_tx = events.clone();
    let error_id = id.to_string();
    let on_error: ErrorCallback = Arc::new(move |err: &SyncError| {
        let _ = error_tx.send(WatchEvent::Error {
            id: error_id.clone(),
            message: err.to_string(),
        });
    });

    (on_update, on_error)
}

/// Watch entities until interrupted
pub async fn watch(
    config: &Config,
    ids: Vec<String>,
    entity_type: EntityType,
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

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut watching = Vec::new();

    for id in ids {
        let (on_update, on_error) = forwarding_callbacks(&id, &events_tx);
        let request = SubscribeRequest::new(id.clone(), entity_type);
        if sync.subscribe(request, Some(on_update), Some(on_error)).await {
            watching.push(id);
        } else {
            output.warning(&format!("Could not subscribe to {} {}", entity_type, id));
        }
    }
    drop(events_tx);

    if watching.is_empty() {
        sync.shutdown(SHUTDOWN_GRACE).await;
        bail!("No transport was able to subscribe to any of the requested ids");
    }

    let transports: Vec<_> = sync.context().modes.iter().map(|m| m.as_str()).collect();
    output.message(&format!(
        "Watching {} {}(s) over {}. Press Ctrl-C to stop.",
        watching.len(),
        entity_type,
        transports.join(", ")
    ));

    let mut context_rx = sync.store().watch_context();
    let mut subscriptions_rx = sync.watch_subscriptions();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }

            Some(event) = events.recv() => match event {
                WatchEvent::Update { id, data, received_at } => {
                    output.print_update(&id, &data, received_at);
                }
                WatchEvent::Error { id, message } => output.print_error(&id, &message),
            },

            changed = context_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let moved = sync.rehome_orphans().await;
                if moved > 0 {
                    output.message(&format!("Moved {} subscription(s) to another transport", moved));
                }
            }

            changed = subscriptions_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if subscriptions_rx.borrow_and_update().is_empty() {
                    output.message("No subscriptions remain.");
                    break;
                }
            }
        }
    }

    for id in &watching {
        sync.unsubscribe(id).await;
    }
    sync.shutdown(SHUTDOWN_GRACE).await;

    Ok(())
}
