//! Shared session state
//!
//! The `SyncStore` holds the committed `ConnectionContext` and
//! `SubscriptionRegistry` for one sync session. Readers take cloned
//! snapshots; writers replace the whole value. Nothing is edited in place
//! while another task might be looking at it.
//!
//! ## Usage
//!
//! ```ignore
//! let store = SyncStore::new(ConnectionContext::new([TransportMode::Socket]));
//!
//! let mut subs = store.subscriptions();
//! subs.insert(subscription);
//! store.set_subscriptions(subs);
//! ```

use std::sync::Arc;

use tokio::sync::watch;

use crate::sync::{ConnectionContext, SubscriptionRegistry};

/// Committed state for one sync session
///
/// Cloning the store yields another handle onto the same state.
#[derive(Clone)]
pub struct SyncStore {
    context: Arc<watch::Sender<ConnectionContext>>,
    subscriptions: Arc<watch::Sender<SubscriptionRegistry>>,
}

impl SyncStore {
    /// Create a store with the given initial context and no subscriptions
    pub fn new(context: ConnectionContext) -> Self {
        let (context, _) = watch::channel(context);
        let (subscriptions, _) = watch::channel(SubscriptionRegistry::new());

        Self {
            context: Arc::new(context),
            subscriptions: Arc::new(subscriptions),
        }
    }

    /// Snapshot of the committed context
    pub fn context(&self) -> ConnectionContext {
        self.context.borrow().clone()
    }

    /// Snapshot of the committed subscriptions
    pub fn subscriptions(&self) -> SubscriptionRegistry {
        self.subscriptions.borrow().clone()
    }

    /// Commit a replacement context
    ///
    /// Modes removed by an earlier commit stay removed, a banned socket
    /// stays banned and counters never go backwards, even if `next` was
    /// derived from an older snapshot.
    pub fn set_context(&self, next: ConnectionContext) {
        self.context.send_modify(|current| {
            let mut next = next;
            next.modes.retain(|mode| current.modes.contains(mode));
            next.banned |= current.banned;
            next.connection_attempts = next.connection_attempts.max(current.connection_attempts);
            next.closures = next.closures.max(current.closures);
            *current = next;
        });
    }

    /// Commit a context derived from the latest committed value
    pub fn update_context<F>(&self, f: F)
    where
        F: FnOnce(&mut ConnectionContext),
    {
        let mut next = self.context();
        f(&mut next);
        self.set_context(next);
    }

    /// Commit a replacement registry
    pub fn set_subscriptions(&self, next: SubscriptionRegistry) {
        self.subscriptions.send_replace(next);
    }

    /// Commit a registry derived from the latest committed value
    pub fn update_subscriptions<F>(&self, f: F)
    where
        F: FnOnce(&mut SubscriptionRegistry),
    {
        self.subscriptions.send_modify(f);
    }

    /// Watch committed subscriptions, e.g. for display
    pub fn watch_subscriptions(&self) -> watch::Receiver<SubscriptionRegistry> {
        self.subscriptions.subscribe()
    }

    /// Watch committed contexts
    pub fn watch_context(&self) -> watch::Receiver<ConnectionContext> {
        self.context.subscribe()
    }
}
