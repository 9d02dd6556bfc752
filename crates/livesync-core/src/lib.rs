//! livesync Core Library
//!
//! This crate provides the client side of livesync: live updates for
//! independently subscribed entities, pushed over a WebSocket when one can
//! be opened and polled over HTTP when it cannot.
//!
//! # Architecture
//!
//! - **MultiModeSync**: tries transports in priority order and drops the
//!   ones that fail for the rest of the session
//! - **SyncStore**: committed connection state and subscriptions, shared
//!   with background socket and polling tasks
//!
//! # Quick Start
//!
//! ```text
//! let sync = Config::load()?.build_sync()?;
//!
//! sync.subscribe(SubscribeRequest::new("team-3", EntityType::Team), None, None).await;
//! sync.publish("team-3", EntityType::Team, json!({"wins": 4})).await;
//! sync.unsubscribe("team-3").await;
//! ```
//!
//! # Modules
//!
//! - `sync`: Orchestrator and transport strategies (main entry point)
//! - `store`: Shared session state
//! - `models`: Transport modes, entity types, and requests
//! - `error`: Transport errors
//! - `config`: Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use models::{EntityType, Publication, SubscribeRequest, TransportMode};
pub use store::SyncStore;
pub use sync::{MultiModeSync, Subscription, SubscriptionRegistry};
