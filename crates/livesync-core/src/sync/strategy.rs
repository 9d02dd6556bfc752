//! Transport strategy contract
//!
//! Every transport implements the same four operations. A strategy that
//! cannot act right now returns `None`; it never panics and never returns an
//! error to the orchestrator.

use async_trait::async_trait;

use super::{ConnectionContext, SubscriptionRegistry};
use crate::models::{Publication, SubscribeRequest, TransportMode};

#[async_trait]
pub trait TransportStrategy: Send + Sync {
    /// Mode this strategy serves
    fn mode(&self) -> TransportMode;

    /// Rebind inbound handlers to the given subscription snapshot
    ///
    /// Called before every orchestrator operation so frames arriving later
    /// are dispatched against current subscriptions.
    fn refresh(&self, context: &ConnectionContext, subscriptions: &SubscriptionRegistry);

    /// Start carrying a subscription
    ///
    /// `subscriptions` already contains the new subscription.
    async fn subscribe(
        &self,
        context: ConnectionContext,
        subscriptions: &SubscriptionRegistry,
        request: &SubscribeRequest,
    ) -> Option<ConnectionContext>;

    /// Stop carrying a subscription
    ///
    /// `subscriptions` no longer contains `id`. Strategies that do not carry
    /// it return the context unchanged.
    async fn unsubscribe(
        &self,
        context: ConnectionContext,
        subscriptions: &SubscriptionRegistry,
        id: &str,
    ) -> ConnectionContext;

    /// Push a local change to the server
    async fn publish(
        &self,
        context: ConnectionContext,
        subscriptions: &SubscriptionRegistry,
        publication: &Publication,
    ) -> Option<ConnectionContext>;
}
