//! Merging of per-relay EOSE signals into one client-visible EOSE.
//!
//! A subscription is pending from the moment it is opened until either
//! every configured relay has reported EOSE for it or the deduplicator
//! fires it early. Check-and-remove happens under a single lock so the
//! merged signal is produced exactly once.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

/// Pending EOSE state for every open subscription of a session.
#[derive(Debug)]
pub struct EoseTracker {
    pending: Mutex<HashMap<String, HashSet<String>>>,
    quorum: usize,
}

impl EoseTracker {
    /// Creates a tracker that completes once `quorum` distinct relays have
    /// reported EOSE.
    #[must_use]
    pub fn new(quorum: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            quorum,
        }
    }

    /// Marks `subscription_id` as pending with no reports yet.
    pub async fn open(&self, subscription_id: &str) {
        self.pending
            .lock()
            .await
            .insert(subscription_id.to_string(), HashSet::new());
    }

    /// Drops pending state for `subscription_id`. Returns `true` if it was
    /// still pending.
    pub async fn close(&self, subscription_id: &str) -> bool {
        self.pending.lock().await.remove(subscription_id).is_some()
    }

    /// Records an EOSE from `relay`.
    ///
    /// Returns `true` exactly once per opened subscription: when the report
    /// completes the quorum. Reports for subscriptions that are not pending
    /// are ignored.
    pub async fn record(&self, subscription_id: &str, relay: &str) -> bool {
        let mut pending = self.pending.lock().await;
        let Some(reported) = pending.get_mut(subscription_id) else {
            return false;
        };
        reported.insert(relay.to_string());
        if reported.len() >= self.quorum {
            pending.remove(subscription_id);
            return true;
        }
        false
    }

    /// Completes `subscription_id` ahead of the quorum.
    ///
    /// Returns `true` if it was pending, in which case the caller owns the
    /// single merged EOSE.
    pub async fn take(&self, subscription_id: &str) -> bool {
        self.close(subscription_id).await
    }

    /// Returns `true` if `subscription_id` is still waiting on relays.
    #[cfg(test)]
    pub(crate) async fn is_pending(&self, subscription_id: &str) -> bool {
        self.pending.lock().await.contains_key(subscription_id)
    }
}
