//! Multi-mode orchestrator
//!
//! Tries transports in priority order and remembers which ones failed. A
//! transport that cannot subscribe is dropped for the rest of the session;
//! publishes and unsubscribes go to every transport still in play.
//!
//! ## Usage
//!
//! ```ignore
//! let sync = MultiModeSync::new(store.clone(), vec![socket, polling]);
//!
//! if sync.subscribe(SubscribeRequest::new("team-7", EntityType::Team), None, None).await {
//!     sync.publish("team-7", EntityType::Team, json!({"wins": 3})).await;
//! }
//! sync.unsubscribe("team-7").await;
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::strategy::TransportStrategy;
use super::{ConnectionContext, ErrorCallback, Subscription, SubscriptionRegistry, UpdateCallback};
use crate::error::SyncError;
use crate::models::{EntityType, Publication, SubscribeRequest, TransportMode};
use crate::store::SyncStore;

/// Result of trying to place one subscription on a transport
struct Placement {
    mode: Option<TransportMode>,
    pruned: bool,
}

/// Orchestrates subscribe, unsubscribe, and publish across transports
pub struct MultiModeSync {
    store: SyncStore,
    strategies: Vec<Arc<dyn TransportStrategy>>,
}

impl MultiModeSync {
    /// Create an orchestrator over `strategies`
    ///
    /// Priority comes from the store's context `modes`, not from the order
    /// of `strategies`.
    pub fn new(store: SyncStore, strategies: Vec<Arc<dyn TransportStrategy>>) -> Self {
        Self { store, strategies }
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    /// Snapshot of committed subscriptions
    pub fn subscriptions(&self) -> SubscriptionRegistry {
        self.store.subscriptions()
    }

    pub fn watch_subscriptions(&self) -> watch::Receiver<SubscriptionRegistry> {
        self.store.watch_subscriptions()
    }

    /// Snapshot of committed transport state
    pub fn context(&self) -> ConnectionContext {
        self.store.context()
    }

    fn strategy(&self, mode: TransportMode) -> Option<&Arc<dyn TransportStrategy>> {
        self.strategies.iter().find(|s| s.mode() == mode)
    }

    fn refresh_all(&self, context: &ConnectionContext, subscriptions: &SubscriptionRegistry) {
        for mode in &context.modes {
            if let Some(strategy) = self.strategy(*mode) {
                strategy.refresh(context, subscriptions);
            }
        }
    }

    /// Subscribe to updates for one entity
    ///
    /// Returns `false` if no transport could carry the subscription. An
    /// existing subscription with the same id is replaced.
    pub async fn subscribe(
        &self,
        request: SubscribeRequest,
        on_update: Option<UpdateCallback>,
        on_error: Option<ErrorCallback>,
    ) -> bool {
        if self.store.subscriptions().contains(&request.id) {
            warn!(id = %request.id, "Already subscribed, replacing existing subscription");
        }

        let subscription = Subscription::new(&request, on_update, on_error);
        let placement = self.place(&request, subscription).await;

        if placement.pruned {
            self.rehome_orphans().await;
        }

        match placement.mode {
            Some(mode) => {
                info!(id = %request.id, %mode, "Subscribed");
                true
            }
            None => {
                warn!(id = %request.id, "No transport was able to subscribe");
                false
            }
        }
    }

    /// Walk viable modes until one accepts the subscription, committing the result
    async fn place(&self, request: &SubscribeRequest, subscription: Subscription) -> Placement {
        let mut context = self.store.context();
        let mut working = self.store.subscriptions();
        working.insert(subscription.clone());

        let mut pruned = false;
        for mode in context.modes.clone() {
            let Some(strategy) = self.strategy(mode) else {
                warn!(%mode, "No strategy registered for mode, removing it");
                context.remove_mode(mode);
                pruned = true;
                continue;
            };

            strategy.refresh(&context, &working);
            match strategy.subscribe(context.clone(), &working, request).await {
                Some(next) => {
                    self.store.update_subscriptions(|subs| {
                        subs.insert(subscription);
                        subs.set_served_by(&request.id, Some(mode));
                    });
                    self.store.set_context(next);
                    return Placement {
                        mode: Some(mode),
                        pruned,
                    };
                }
                None => {
                    info!(id = %request.id, %mode, "Transport unavailable, removing it for this session");
                    context.remove_mode(mode);
                    pruned = true;
                }
            }
        }

        self.store.set_context(context);
        Placement { mode: None, pruned }
    }

    /// Re-subscribe every subscription left without a live transport
    ///
    /// Covers subscriptions whose mode was dropped and socket subscriptions
    /// whose socket closed while the socket mode is still viable. Returns the
    /// number placed again. Subscriptions no transport can take are removed
    /// and told through `on_error`. Each id is tried at most once per call.
    pub async fn rehome_orphans(&self) -> usize {
        let mut rehomed = 0;
        let mut attempted = HashSet::new();

        loop {
            let context = self.store.context();
            let orphans: Vec<Subscription> = self
                .store
                .subscriptions()
                .iter()
                .filter(|sub| is_orphan(&context, sub) && !attempted.contains(&sub.id))
                .cloned()
                .collect();

            let Some(orphan) = orphans.into_iter().next() else {
                return rehomed;
            };
            attempted.insert(orphan.id.clone());

            let request = SubscribeRequest::new(orphan.id.clone(), orphan.entity_type);
            let mut candidate = orphan.clone();
            candidate.served_by = None;

            match self.place(&request, candidate).await.mode {
                Some(mode) => {
                    info!(id = %orphan.id, %mode, "Re-subscribed orphaned subscription");
                    rehomed += 1;
                }
                None => {
                    warn!(id = %orphan.id, "No transport left for subscription, dropping it");
                    self.store.update_subscriptions(|subs| {
                        subs.remove(&orphan.id);
                    });
                    orphan.notify_error(&SyncError::NoTransport {
                        id: orphan.id.clone(),
                    });
                }
            }
        }
    }

    /// Stop receiving updates for one entity
    ///
    /// Unknown ids are a no-op apart from the transport calls.
    pub async fn unsubscribe(&self, id: &str) {
        let mut context = self.store.context();
        let mut subscriptions = self.store.subscriptions();
        self.refresh_all(&context, &subscriptions);

        if subscriptions.remove(id).is_none() {
            debug!(id = %id, "Unsubscribe for unknown id");
        }
        self.store.update_subscriptions(|subs| {
            subs.remove(id);
        });

        for mode in context.modes.clone() {
            if let Some(strategy) = self.strategy(mode) {
                context = strategy.unsubscribe(context, &subscriptions, id).await;
            }
        }

        self.store.set_context(context);
    }

    /// Push a local change through the first transport that accepts it
    ///
    /// No subscription is required. Failures do not remove transports.
    pub async fn publish(&self, id: &str, entity_type: EntityType, data: Value) -> bool {
        let publication = Publication::new(id, entity_type, data);
        let context = self.store.context();
        let subscriptions = self.store.subscriptions();
        self.refresh_all(&context, &subscriptions);

        for mode in &context.modes {
            let Some(strategy) = self.strategy(*mode) else {
                continue;
            };

            if let Some(next) = strategy
                .publish(context.clone(), &subscriptions, &publication)
                .await
            {
                debug!(id = %id, %mode, "Published update");
                self.store.set_context(next);
                return true;
            }
        }

        error!("Unable to publish update; no strategy was able to publish the update");
        false
    }

    /// Close the socket and stop polling
    ///
    /// Waits up to `grace` for queued socket frames to be written. Calling
    /// this more than once is harmless.
    pub async fn shutdown(&self, grace: Duration) {
        let mut context = self.store.context();
        if let Some(handle) = context.polling.take() {
            handle.cancel();
        }
        let socket = context.socket.take();
        self.store.set_context(context);

        if let Some(socket) = socket {
            socket.close();
            if tokio::time::timeout(grace, socket.closed()).await.is_err() {
                warn!(socket = %socket.id(), "Socket did not close in time");
            }
        }
    }
}

/// Whether a subscription has lost the transport that carried it
fn is_orphan(context: &ConnectionContext, subscription: &Subscription) -> bool {
    match subscription.served_by {
        Some(mode) if !context.is_viable(mode) => true,
        Some(TransportMode::Socket) => context.open_socket().is_none(),
        _ => false,
    }
}
