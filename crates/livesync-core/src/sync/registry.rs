//! Subscription registry
//!
//! Maps entity ids to the callbacks interested in them. The registry is a
//! plain value: callers clone it, edit the clone, and commit the whole map
//! back through [`SyncStore`](crate::store::SyncStore).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info};

use crate::error::SyncError;
use crate::models::{EntityType, SubscribeRequest, TransportMode};

/// Callback invoked with each new payload
pub type UpdateCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback invoked when delivery for a subscription fails
pub type ErrorCallback = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// A registered interest in one entity
#[derive(Clone)]
pub struct Subscription {
    /// Entity identifier
    pub id: String,
    /// Kind of entity
    pub entity_type: EntityType,
    /// Transport currently carrying this subscription
    pub served_by: Option<TransportMode>,
    /// When data for this entity last arrived
    pub last_update: Option<DateTime<Utc>>,
    on_update: UpdateCallback,
    on_error: ErrorCallback,
}

impl Subscription {
    /// Create a subscription with optional callbacks
    ///
    /// Missing callbacks default to logging the payload or the error.
    pub fn new(
        request: &SubscribeRequest,
        on_update: Option<UpdateCallback>,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        let on_update = on_update.unwrap_or_else(|| {
            let id = request.id.clone();
            Arc::new(move |data: &Value| info!(id = %id, %data, "Received update"))
        });
        let on_error = on_error.unwrap_or_else(|| {
            let id = request.id.clone();
            Arc::new(move |err: &SyncError| error!(id = %id, "Subscription error: {}", err))
        });

        Self {
            id: request.id.clone(),
            entity_type: request.entity_type,
            served_by: None,
            last_update: None,
            on_update,
            on_error,
        }
    }

    /// Deliver a payload to the update callback
    pub fn notify_update(&self, data: &Value) {
        (self.on_update)(data);
    }

    /// Deliver an error to the error callback
    pub fn notify_error(&self, err: &SyncError) {
        (self.on_error)(err);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("entity_type", &self.entity_type)
            .field("served_by", &self.served_by)
            .field("last_update", &self.last_update)
            .finish_non_exhaustive()
    }
}

/// All active subscriptions, keyed by entity id
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription, returning the one it replaced
    pub fn insert(&mut self, subscription: Subscription) -> Option<Subscription> {
        self.entries.insert(subscription.id.clone(), subscription)
    }

    pub fn remove(&mut self, id: &str) -> Option<Subscription> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Subscription> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.values()
    }

    /// Ids of every subscription, sorted for stable output
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Subscriptions carried by the given transport
    pub fn served_by(&self, mode: TransportMode) -> impl Iterator<Item = &Subscription> {
        self.entries
            .values()
            .filter(move |sub| sub.served_by == Some(mode))
    }

    /// Record which transport carries a subscription
    pub fn set_served_by(&mut self, id: &str, mode: Option<TransportMode>) {
        if let Some(sub) = self.entries.get_mut(id) {
            sub.served_by = mode;
        }
    }

    /// Record when data for a subscription last arrived
    pub fn touch(&mut self, id: &str, at: DateTime<Utc>) {
        if let Some(sub) = self.entries.get_mut(id) {
            sub.last_update = Some(at);
        }
    }

    /// Subscriptions addressed by a frame: one when `id` is given, all otherwise
    pub fn targets<'a>(&'a self, id: Option<&'a str>) -> Vec<&'a Subscription> {
        match id {
            Some(id) => self.entries.get(id).into_iter().collect(),
            None => self.entries.values().collect(),
        }
    }
}
