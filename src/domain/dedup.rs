//! Per-subscription record of event ids already delivered to the client.
//!
//! Several relays usually hold the same events, so each id is delivered at
//! most once per subscription. Once a subscription has seen more distinct
//! ids than the configured threshold the set reports itself saturated; the
//! session uses that to fire EOSE early instead of waiting on slow relays.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

/// Outcome of observing an event id for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// The subscription is not open; drop the event.
    Untracked,
    /// The id was already delivered.
    Repeat {
        /// More distinct ids than the threshold have been seen.
        saturated: bool,
    },
    /// First delivery of this id; forward the event.
    First {
        /// More distinct ids than the threshold have been seen.
        saturated: bool,
    },
}

impl Sighting {
    /// Returns `true` if the event must be forwarded to the client.
    #[must_use]
    pub const fn is_first(self) -> bool {
        matches!(self, Self::First { .. })
    }

    /// Returns `true` if the subscription's set is past the threshold.
    #[must_use]
    pub const fn is_saturated(self) -> bool {
        matches!(
            self,
            Self::Repeat { saturated: true } | Self::First { saturated: true }
        )
    }
}

/// Seen-id sets for every open subscription of a session.
#[derive(Debug)]
pub struct Deduplicator {
    seen: Mutex<HashMap<String, HashSet<String>>>,
    threshold: usize,
}

impl Deduplicator {
    /// Creates a deduplicator that saturates past `threshold` distinct ids.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            threshold,
        }
    }

    /// Starts tracking `subscription_id` with an empty set, discarding any
    /// previous set under the same id.
    pub async fn open(&self, subscription_id: &str) {
        self.seen
            .lock()
            .await
            .insert(subscription_id.to_string(), HashSet::new());
    }

    /// Stops tracking `subscription_id`. Returns `true` if it was tracked.
    pub async fn close(&self, subscription_id: &str) -> bool {
        self.seen.lock().await.remove(subscription_id).is_some()
    }

    /// Marks `event_id` as seen for `subscription_id`.
    pub async fn observe(&self, subscription_id: &str, event_id: &str) -> Sighting {
        let mut seen = self.seen.lock().await;
        let Some(ids) = seen.get_mut(subscription_id) else {
            return Sighting::Untracked;
        };
        let first = ids.insert(event_id.to_string());
        let saturated = ids.len() > self.threshold;
        if first {
            Sighting::First { saturated }
        } else {
            Sighting::Repeat { saturated }
        }
    }

    /// Number of distinct ids seen for `subscription_id`, if tracked.
    #[cfg(test)]
    pub(crate) async fn seen_count(&self, subscription_id: &str) -> Option<usize> {
        self.seen.lock().await.get(subscription_id).map(HashSet::len)
    }
}
