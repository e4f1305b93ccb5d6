//! WebSocket layer: client connections, wire messages, upgrade handler.
//!
//! The endpoint at `/` speaks the Nostr client protocol. Every accepted
//! socket is backed by one [`crate::domain::Session`].

pub mod connection;
pub mod handler;
pub mod messages;
