//! Relay side: outbound handshakes and the per-relay connection worker.

pub mod dial;
pub mod worker;

pub use dial::{RelayStream, dial, install_crypto_provider};
