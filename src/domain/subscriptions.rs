//! Active subscriptions of one session.
//!
//! Maps client-chosen subscription ids to their filter lists. Used to drop
//! relay deliveries for subscriptions the client never opened or already
//! closed, and to replay every open subscription to a freshly connected
//! relay.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::ws::messages::WireMessage;

/// Subscription id → filters, behind its own lock.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    filters: RwLock<HashMap<String, Vec<Value>>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `filters` under `id`, returning the filters it replaced.
    pub async fn insert(&self, id: String, filters: Vec<Value>) -> Option<Vec<Value>> {
        self.filters.write().await.insert(id, filters)
    }

    /// Removes `id`, returning its filters if it was registered.
    pub async fn remove(&self, id: &str) -> Option<Vec<Value>> {
        self.filters.write().await.remove(id)
    }

    /// Returns `true` if `id` is currently open.
    pub async fn contains(&self, id: &str) -> bool {
        self.filters.read().await.contains_key(id)
    }

    /// Current filters of `id`, if it is open.
    pub async fn filters(&self, id: &str) -> Option<Vec<Value>> {
        self.filters.read().await.get(id).cloned()
    }

    /// Builds one `REQ` per open subscription for replay to a relay.
    ///
    /// The lock is released before the caller writes anything.
    pub async fn replay_requests(&self) -> Vec<WireMessage> {
        self.filters
            .read()
            .await
            .iter()
            .map(|(id, filters)| WireMessage::Req {
                subscription_id: id.clone(),
                filters: filters.clone(),
            })
            .collect()
    }

    /// Number of open subscriptions.
    pub(crate) async fn len(&self) -> usize {
        self.filters.read().await.len()
    }

    /// Returns `true` if no subscription is open.
    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.filters.read().await.is_empty()
    }
}
