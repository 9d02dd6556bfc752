//! Live update sync
//!
//! Keeps subscribed entities fresh over whichever transport works, falling
//! back from a persistent WebSocket to HTTP polling.
//!
//! ## Protocol
//!
//! Over the socket, JSON frames tagged by `type`:
//! 1. Client sends `subscribed` / `unsubscribed` for each entity id
//! 2. Server pushes `Update` frames, targeted by `id` or broadcast
//! 3. Server checks liveness with `Marco`; the client answers `polo`
//! 4. Client pushes local changes as `update` frames
//!
//! Over HTTP, the polling loop asks `latest-update` for each subscription
//! and posts local changes to `update`.
//!
//! ## Usage
//!
//! ```ignore
//! let sync = config.build_sync()?;
//! sync.subscribe(SubscribeRequest::new("div-1", EntityType::Division), None, None).await;
//! ```

mod context;
mod message;
mod multi;
mod polling;
mod registry;
mod socket;
mod source;
mod strategy;

pub use context::ConnectionContext;
pub use message::{ClientFrame, ServerFrame};
pub use multi::MultiModeSync;
pub use polling::{IterationSummary, PollingConfig, PollingHandle, PollingStrategy};
pub use registry::{ErrorCallback, Subscription, SubscriptionRegistry, UpdateCallback};
pub use socket::{ReadyState, SocketConfig, SocketHandle, SocketStrategy};
pub use source::{HttpUpdateSource, LatestUpdate, UpdateResult, UpdateSource};
pub use strategy::TransportStrategy;
