//! Polling transport
//!
//! Periodically asks the update source for changes to every subscription it
//! carries. All subscribers share one background loop: the first subscribe
//! starts it, the last unsubscribe cancels it.
//!
//! ## Iteration outcomes
//!
//! Each subscription is classified per iteration:
//! - **Updated**: new data, delivered and `last_update` advanced
//! - **NoChange**: nothing new
//! - **NotTracked**: the server no longer knows the id, dropped silently
//! - **Error**: the server reported a failure, delivered to `on_error` and dropped
//! - **Exception**: the request itself failed, delivered to `on_error` and dropped
//!
//! An iteration where every request failed disables polling for the session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::source::{LatestUpdate, UpdateResult, UpdateSource};
use super::strategy::TransportStrategy;
use super::{ConnectionContext, Subscription, SubscriptionRegistry};
use crate::error::{SyncError, SyncResult};
use crate::models::{Publication, SubscribeRequest, TransportMode};
use crate::store::SyncStore;

/// Configuration for the polling transport
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Delay before the first iteration
    pub initial_delay: Duration,
    /// Delay between later iterations
    pub interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            interval: Duration::from_secs(5),
        }
    }
}

/// Reference to a running polling loop
#[derive(Clone)]
pub struct PollingHandle {
    id: Uuid,
    task: Arc<AbortHandle>,
}

impl PollingHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the loop is still scheduled
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop; cancelling twice is harmless
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl fmt::Debug for PollingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Classification of one poll request
#[derive(Debug)]
pub enum PollOutcome {
    Updated {
        data: Value,
        last_update: DateTime<Utc>,
    },
    NoChange,
    NotTracked,
    Error(String),
    Exception(SyncError),
}

impl PollOutcome {
    /// Classify the result of a latest-update request
    pub fn classify(result: SyncResult<LatestUpdate>) -> Self {
        match result {
            Err(e) => PollOutcome::Exception(e),
            Ok(LatestUpdate {
                success: false,
                message,
                ..
            }) => PollOutcome::Error(
                message.unwrap_or_else(|| "Update source reported a failure".to_string()),
            ),
            Ok(LatestUpdate { result: None, .. }) => PollOutcome::NotTracked,
            Ok(LatestUpdate {
                result:
                    Some(UpdateResult {
                        data: Some(data),
                        last_update,
                    }),
                ..
            }) => PollOutcome::Updated { data, last_update },
            Ok(LatestUpdate {
                result: Some(UpdateResult { data: None, .. }),
                ..
            }) => PollOutcome::NoChange,
        }
    }
}

/// What happened during one polling iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationSummary {
    pub polled: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub not_tracked: usize,
    pub errors: usize,
    pub exceptions: usize,
    /// Polling subscriptions left after the iteration was committed
    pub remaining: usize,
}

/// What the loop does after an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Reschedule,
    Stop,
    Disable,
}

impl IterationSummary {
    pub fn succeeded(&self) -> usize {
        self.updated + self.unchanged
    }

    pub fn next_step(&self) -> NextStep {
        if self.polled > 0 && self.exceptions == self.polled {
            NextStep::Disable
        } else if self.remaining == 0 {
            NextStep::Stop
        } else {
            NextStep::Reschedule
        }
    }
}

/// Polling transport strategy
pub struct PollingStrategy {
    config: PollingConfig,
    source: Arc<dyn UpdateSource>,
    store: SyncStore,
}

impl PollingStrategy {
    pub fn new(config: PollingConfig, source: Arc<dyn UpdateSource>, store: SyncStore) -> Self {
        Self {
            config,
            source,
            store,
        }
    }

    /// Run one iteration now, outside the schedule
    pub async fn poll_once(&self) -> IterationSummary {
        run_iteration(&self.store, self.source.as_ref()).await
    }

    fn spawn_loop(&self) -> PollingHandle {
        let id = Uuid::new_v4();
        let task = tokio::spawn(polling_loop(
            id,
            self.config.clone(),
            self.source.clone(),
            self.store.clone(),
        ));

        PollingHandle {
            id,
            task: Arc::new(task.abort_handle()),
        }
    }
}

#[async_trait]
impl TransportStrategy for PollingStrategy {
    fn mode(&self) -> TransportMode {
        TransportMode::Polling
    }

    /// The loop reads committed subscriptions on every iteration, so there
    /// is nothing to rebind.
    fn refresh(&self, _context: &ConnectionContext, _subscriptions: &SubscriptionRegistry) {}

    async fn subscribe(
        &self,
        mut context: ConnectionContext,
        _subscriptions: &SubscriptionRegistry,
        request: &SubscribeRequest,
    ) -> Option<ConnectionContext> {
        if context.active_polling().is_some() {
            debug!(id = %request.id, "Joining existing polling loop");
            return Some(context);
        }

        let handle = self.spawn_loop();
        info!(id = %request.id, poller = %handle.id(), "Started polling loop");
        context.polling = Some(handle);
        Some(context)
    }

    async fn unsubscribe(
        &self,
        mut context: ConnectionContext,
        subscriptions: &SubscriptionRegistry,
        _id: &str,
    ) -> ConnectionContext {
        if subscriptions.served_by(TransportMode::Polling).next().is_some() {
            return context;
        }

        if let Some(handle) = context.polling.take() {
            info!(poller = %handle.id(), "No polling subscriptions remain, stopping loop");
            handle.cancel();
        }
        context
    }

    async fn publish(
        &self,
        context: ConnectionContext,
        _subscriptions: &SubscriptionRegistry,
        publication: &Publication,
    ) -> Option<ConnectionContext> {
        match self.source.post_update(publication).await {
            Ok(()) => {
                debug!(id = %publication.id, "Published over HTTP");
                Some(context)
            }
            Err(e) => {
                warn!(id = %publication.id, "Failed to post update: {}", e);
                None
            }
        }
    }
}

/// Background loop, one per session at most
async fn polling_loop(
    id: Uuid,
    config: PollingConfig,
    source: Arc<dyn UpdateSource>,
    store: SyncStore,
) {
    tokio::time::sleep(config.initial_delay).await;

    loop {
        let summary = run_iteration(&store, source.as_ref()).await;
        debug!(?summary, "Polling iteration finished");

        match summary.next_step() {
            NextStep::Reschedule => tokio::time::sleep(config.interval).await,
            NextStep::Stop => {
                debug!(poller = %id, "No polling subscriptions left, stopping loop");
                store.update_context(|ctx| clear_handle(ctx, id));
                return;
            }
            NextStep::Disable => {
                warn!(
                    failures = summary.exceptions,
                    "Every poll request failed, disabling polling transport"
                );
                store.update_context(|ctx| {
                    clear_handle(ctx, id);
                    ctx.remove_mode(TransportMode::Polling);
                });
                return;
            }
        }
    }
}

fn clear_handle(ctx: &mut ConnectionContext, id: Uuid) {
    if ctx.polling.as_ref().is_some_and(|handle| handle.id() == id) {
        ctx.polling = None;
    }
}

/// Poll every subscription carried by this transport once
///
/// Removals and timestamp advances are committed together at the end.
async fn run_iteration(store: &SyncStore, source: &dyn UpdateSource) -> IterationSummary {
    let polled: Vec<Subscription> = store
        .subscriptions()
        .served_by(TransportMode::Polling)
        .cloned()
        .collect();

    let mut summary = IterationSummary {
        polled: polled.len(),
        ..IterationSummary::default()
    };
    let mut advanced = Vec::new();
    let mut dropped = Vec::new();

    for sub in &polled {
        let result = source
            .latest_update(&sub.id, sub.entity_type, sub.last_update)
            .await;

        match PollOutcome::classify(result) {
            PollOutcome::Updated { data, last_update } => {
                sub.notify_update(&data);
                advanced.push((sub.id.clone(), last_update));
                summary.updated += 1;
            }
            PollOutcome::NoChange => {
                summary.unchanged += 1;
            }
            PollOutcome::NotTracked => {
                debug!(id = %sub.id, "No longer tracked, dropping subscription");
                dropped.push(sub.id.clone());
                summary.not_tracked += 1;
            }
            PollOutcome::Error(message) => {
                sub.notify_error(&SyncError::delivery(Some(sub.id.clone()), message));
                dropped.push(sub.id.clone());
                summary.errors += 1;
            }
            PollOutcome::Exception(err) => {
                warn!(id = %sub.id, "Poll request failed: {}", err);
                sub.notify_error(&err);
                dropped.push(sub.id.clone());
                summary.exceptions += 1;
            }
        }
    }

    if !advanced.is_empty() || !dropped.is_empty() {
        store.update_subscriptions(|subs| {
            for (id, at) in &advanced {
                subs.touch(id, *at);
            }
            for id in &dropped {
                subs.remove(id);
            }
        });
    }

    summary.remaining = store
        .subscriptions()
        .served_by(TransportMode::Polling)
        .count();
    summary
}
