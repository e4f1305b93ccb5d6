//! Session core: per-client registries, relay connections and merging.
//!
//! Each registry guards one logical resource behind its own lock. The
//! [`Session`] composes them and owns the cross-registry ordering.

pub mod cancellation;
pub mod connections;
pub mod dedup;
pub mod eose;
pub mod outbound;
pub mod session;
pub mod subscriptions;

pub use cancellation::CancellationRegistry;
pub use connections::{ConnectionTable, RelayConnection};
pub use dedup::{Deduplicator, Sighting};
pub use eose::EoseTracker;
pub use outbound::OutboundQueue;
pub use session::Session;
pub use subscriptions::SubscriptionRegistry;
