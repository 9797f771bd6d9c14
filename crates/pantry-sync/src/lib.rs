//! # pantry-sync
//!
//! Keeps the client read cache consistent with server-side changes.
//!
//! - [`Transport`]: one WebSocket session per household, handshake,
//!   fixed-delay reconnection, lifecycle events
//! - [`SubscriptionRegistry`]: event-type → handler sets, failure-isolated dispatch
//! - [`CacheSynchronizer`]: translates envelopes into insert/merge/remove on a
//!   [`ReadCache`](pantry_cache::ReadCache) collection, scoped to one view

#![deny(unsafe_code)]

pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod synchronizer;
pub mod transport;

pub use errors::{ConnectionError, HandlerError, TransportError};
pub use lifecycle::{ConnectionState, DisconnectReason, LifecycleEvent};
pub use registry::{DispatchReport, Handler, HandlerResult, SubscriptionRegistry};
pub use synchronizer::{ActiveSync, CacheSynchronizer, Placement, SkipReason, SyncOutcome, SyncTarget};
pub use transport::{Transport, TransportConfig};

#[cfg(any(test, feature = "test-support"))]
pub use transport::TransportDebug;
