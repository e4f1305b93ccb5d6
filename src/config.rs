//! Bouncer configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). The relay list is the only required
//! setting.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{BouncerError, BouncerResult};

/// Top-level process configuration.
///
/// Loaded once at startup via [`BouncerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct BouncerConfig {
    /// Socket address to bind the client-facing server to.
    pub listen_addr: SocketAddr,

    /// Emit JSON log lines instead of human-readable text.
    pub json_logs: bool,

    /// Settings handed to every client session.
    pub session: SessionConfig,
}

/// Per-session settings, injected into each [`crate::domain::Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Backend relay URLs, deduplicated, in configuration order.
    pub relays: Vec<String>,

    /// Upper bound on a single dial attempt.
    pub dial_timeout: Duration,

    /// Fixed delay between a failed attempt and the next one.
    pub retry_interval: Duration,

    /// Distinct event ids after which a pending EOSE fires early.
    pub eose_threshold: usize,

    /// Capacity of the per-session outbound queue.
    pub outbound_capacity: usize,

    /// `User-Agent` header sent when dialing relays.
    pub user_agent: String,
}

impl SessionConfig {
    /// Builds a session configuration with default timings for `relays`.
    ///
    /// # Errors
    ///
    /// Returns [`BouncerError::InvalidConfig`] if the list is empty or any
    /// entry is not a `ws://` / `wss://` URL.
    pub fn new<I, S>(relays: I) -> BouncerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            relays: normalize_relays(relays)?,
            dial_timeout: Duration::from_secs(20),
            retry_interval: Duration::from_secs(5),
            eose_threshold: 500,
            outbound_capacity: 1024,
            user_agent: default_user_agent(),
        })
    }

    /// Number of relays a subscription needs EOSE from.
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.relays.len()
    }
}

impl BouncerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults for every variable except `BOUNCER_RELAYS`.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`BouncerError::InvalidConfig`] if `LISTEN_ADDR` cannot be
    /// parsed or the relay list is missing, empty or malformed.
    pub fn from_env() -> BouncerResult<Self> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|e| BouncerError::InvalidConfig(format!("LISTEN_ADDR: {e}")))?;

        let raw_relays = std::env::var("BOUNCER_RELAYS")
            .map_err(|_| BouncerError::InvalidConfig("BOUNCER_RELAYS is not set".to_string()))?;

        let mut session = SessionConfig::new(split_relay_list(&raw_relays))?;
        session.dial_timeout = Duration::from_secs(parse_env("BOUNCER_DIAL_TIMEOUT_SECS", 20));
        session.retry_interval = Duration::from_secs(parse_env("BOUNCER_RETRY_INTERVAL_SECS", 5));
        session.eose_threshold = parse_env("BOUNCER_EOSE_THRESHOLD", 500);
        session.outbound_capacity = parse_env("BOUNCER_OUTBOUND_CAPACITY", 1024).max(1);
        if let Ok(agent) = std::env::var("BOUNCER_USER_AGENT")
            && !agent.trim().is_empty()
        {
            session.user_agent = agent;
        }

        let json_logs = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            listen_addr,
            json_logs,
            session,
        })
    }
}

fn default_user_agent() -> String {
    format!("nostr-bouncer/{}", env!("CARGO_PKG_VERSION"))
}

/// Splits a relay list on commas and whitespace, skipping empty pieces.
fn split_relay_list(raw: &str) -> Vec<&str> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Validates relay URLs and drops repeats, keeping first-seen order.
fn normalize_relays<I, S>(relays: I) -> BouncerResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for relay in relays {
        let relay = relay.as_ref().trim();
        if !(relay.starts_with("ws://") || relay.starts_with("wss://")) {
            return Err(BouncerError::InvalidConfig(format!(
                "relay url must use ws:// or wss://: {relay}"
            )));
        }
        if !out.iter().any(|r| r == relay) {
            out.push(relay.to_string());
        }
    }
    if out.is_empty() {
        return Err(BouncerError::InvalidConfig(
            "at least one relay must be configured".to_string(),
        ));
    }
    Ok(out)
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
