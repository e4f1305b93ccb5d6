//! # nostr-bouncer
//!
//! Per-client aggregation proxy for Nostr relays.
//!
//! Every client socket gets a [`domain::Session`] that opens one upstream
//! connection per configured relay, replicates the client's subscriptions
//! and published events to all of them, and merges the replies into one
//! deduplicated stream with a single EOSE per subscription. Relays that
//! fail are redialed with a fixed backoff.
//!
//! ## Architecture
//!
//! ```text
//! Client (WebSocket)
//!     │
//!     ├── WS Handler (ws/)
//!     │
//!     ├── Session (domain/)
//!     │     ├── SubscriptionRegistry, Deduplicator, EoseTracker
//!     │     ├── ConnectionTable (fan-out), CancellationRegistry
//!     │     └── OutboundQueue ──► client writer
//!     │
//!     └── Relay workers (relay/) ──► upstream relays
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod relay;
pub mod ws;
