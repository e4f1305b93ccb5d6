//! One client's view of the relay set.
//!
//! A [`Session`] is created per accepted client socket. On the first
//! subscribe or publish it starts one relay worker per configured relay;
//! client operations then fan out to every connected relay, and relay
//! replies flow back through deduplication and EOSE merging into the
//! session's [`OutboundQueue`].
//!
//! # Locking
//!
//! Every registry owns its own lock and no code path holds two of them at
//! once. Operations that touch several registries do so in sequence.
//! Teardown is a single [`CancellationToken`] observed by all workers; the
//! dial registry and connection table are sealed under their own locks so
//! nothing can be registered after [`Session::destroy`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use super::cancellation::CancellationRegistry;
use super::connections::{ConnectionTable, RelayConnection};
use super::dedup::Deduplicator;
use super::eose::EoseTracker;
use super::outbound::OutboundQueue;
use super::subscriptions::SubscriptionRegistry;
use crate::config::SessionConfig;
use crate::error::{BouncerError, BouncerResult};
use crate::relay::worker;
use crate::ws::messages::WireMessage;

/// Aggregating proxy state for a single client connection.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    client: String,
    config: Arc<SessionConfig>,
    subscriptions: SubscriptionRegistry,
    dedup: Deduplicator,
    eose: EoseTracker,
    connections: ConnectionTable,
    dials: CancellationRegistry,
    outbound: OutboundQueue,
    started: AtomicBool,
    destroyed: AtomicBool,
    shutdown: CancellationToken,
}

impl Session {
    /// Creates a session for `client` and returns the receiving end of its
    /// outbound queue.
    ///
    /// No relay is contacted until the first subscribe or publish.
    #[must_use]
    pub fn new(
        client: impl Into<String>,
        config: Arc<SessionConfig>,
    ) -> (Arc<Self>, mpsc::Receiver<WireMessage>) {
        let shutdown = CancellationToken::new();
        let (outbound, receiver) = OutboundQueue::new(config.outbound_capacity, shutdown.clone());
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            client: client.into(),
            dedup: Deduplicator::new(config.eose_threshold),
            eose: EoseTracker::new(config.quorum()),
            config,
            subscriptions: SubscriptionRegistry::new(),
            connections: ConnectionTable::new(),
            dials: CancellationRegistry::new(),
            outbound,
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            shutdown,
        });
        (session, receiver)
    }

    /// Unique id of this session, for diagnostics.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Client identifier, usually the peer address.
    #[must_use]
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Settings this session was built with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns `true` once relay workers have been launched.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Returns `true` once [`Session::destroy`] has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Resolves when the session has been torn down.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// Sorted URLs of relays with an established connection.
    pub async fn connected_relays(&self) -> Vec<String> {
        self.connections.urls().await
    }

    /// Opens subscription `subscription_id`, replacing any open
    /// subscription with the same id, and forwards it to every relay.
    pub async fn subscribe(self: &Arc<Self>, subscription_id: String, filters: Vec<Value>) {
        if self.is_destroyed() {
            return;
        }
        self.ensure_started();

        if self.subscriptions.contains(&subscription_id).await {
            self.unsubscribe(&subscription_id, false).await;
        }

        self.dedup.open(&subscription_id).await;
        self.eose.open(&subscription_id).await;
        self.subscriptions
            .insert(subscription_id.clone(), filters.clone())
            .await;

        let request = WireMessage::Req {
            subscription_id,
            filters,
        };
        let sent = self.connections.broadcast(&request).await;
        tracing::debug!(client = %self.client, relays = sent, "subscription forwarded");
    }

    /// Closes subscription `subscription_id` and forwards the close to
    /// every relay. When `notify` is set the client gets a `CLOSED`.
    pub async fn unsubscribe(&self, subscription_id: &str, notify: bool) {
        if self.is_destroyed() {
            return;
        }

        self.dedup.close(subscription_id).await;
        self.subscriptions.remove(subscription_id).await;
        self.eose.close(subscription_id).await;

        if notify {
            self.emit(WireMessage::Closed {
                subscription_id: subscription_id.to_string(),
                reason: String::new(),
            })
            .await;
        }

        self.connections
            .broadcast(&WireMessage::Close {
                subscription_id: subscription_id.to_string(),
            })
            .await;
    }

    /// Acknowledges `event` to the client and forwards it to every relay.
    ///
    /// The acknowledgement is optimistic: it does not wait for any relay.
    ///
    /// # Errors
    ///
    /// Returns [`BouncerError::MalformedPublish`] if the event has no string
    /// `id`. The client has already been sent a `NOTICE` in that case and
    /// nothing is forwarded.
    pub async fn publish(self: &Arc<Self>, event: Map<String, Value>) -> BouncerResult<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        self.ensure_started();

        let Some(event_id) = event.get("id").and_then(Value::as_str).map(str::to_owned) else {
            let err = BouncerError::MalformedPublish;
            if let Some(message) = err.notice() {
                self.emit(WireMessage::Notice { message }).await;
            }
            return Err(err);
        };

        self.emit(WireMessage::Ok {
            event_id,
            accepted: true,
            message: String::new(),
        })
        .await;

        self.connections
            .broadcast(&WireMessage::Event {
                subscription_id: None,
                event,
            })
            .await;
        Ok(())
    }

    /// Sends a `NOTICE` to the client.
    pub async fn send_notice(&self, message: impl Into<String>) {
        self.emit(WireMessage::Notice {
            message: message.into(),
        })
        .await;
    }

    /// Tears the session down: cancels pending dials, closes every relay
    /// connection and signals termination. Later calls do nothing.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let dials = self.dials.cancel_all().await;
        let connections = self.connections.close_all().await;
        let subscriptions = self.subscriptions.len().await;
        tracing::info!(
            client = %self.client,
            session = %self.id,
            cancelled_dials = dials,
            closed_connections = connections,
            open_subscriptions = subscriptions,
            "session destroyed"
        );
    }

    /// Launches one worker per relay the first time it is called.
    fn ensure_started(self: &Arc<Self>) {
        if self.is_destroyed() || self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(
            client = %self.client,
            session = %self.id,
            relays = self.config.relays.len(),
            "session starting"
        );
        for url in &self.config.relays {
            tokio::spawn(worker::run(Arc::clone(self), url.clone()));
        }
    }

    pub(crate) fn dials(&self) -> &CancellationRegistry {
        &self.dials
    }

    pub(crate) fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Sends every open subscription to a newly connected relay, using the
    /// connection's own write lock.
    pub(crate) async fn replay_subscriptions(&self, connection: &RelayConnection) {
        let replayed = self.subscriptions.replay_requests().await;
        for request in &replayed {
            if let Err(err) = connection.send(request).await {
                tracing::debug!(relay = %connection.url(), %err, "subscription replay failed");
                return;
            }
        }
        self.reconcile_replay(connection, replayed).await;
    }

    /// Brings a relay back in line with the registry after a replay.
    ///
    /// The registry lock is not held while replaying, so a client close or
    /// resubscribe may have reached the relay before the replayed `REQ`.
    /// Closed ids get a `CLOSE`, ids with new filters get their current
    /// `REQ` again.
    async fn reconcile_replay(&self, connection: &RelayConnection, replayed: Vec<WireMessage>) {
        for request in replayed {
            let WireMessage::Req {
                subscription_id,
                filters,
            } = request
            else {
                continue;
            };
            let correction = match self.subscriptions.filters(&subscription_id).await {
                None => WireMessage::Close { subscription_id },
                Some(current) if current != filters => WireMessage::Req {
                    subscription_id,
                    filters: current,
                },
                Some(_) => continue,
            };
            tracing::debug!(
                relay = %connection.url(),
                tag = correction.tag(),
                "correcting replayed subscription"
            );
            if let Err(err) = connection.send(&correction).await {
                tracing::debug!(relay = %connection.url(), %err, "replay correction failed");
                return;
            }
        }
    }

    /// Routes one decoded message received from `relay`.
    pub(crate) async fn route_relay_message(&self, relay: &str, message: WireMessage) {
        match message {
            WireMessage::Event {
                subscription_id: Some(subscription_id),
                event,
            } => self.deliver_event(subscription_id, event).await,
            WireMessage::Eose { subscription_id } => {
                if self.eose.record(&subscription_id, relay).await {
                    self.emit(WireMessage::Eose { subscription_id }).await;
                }
            }
            other => {
                tracing::debug!(relay, tag = other.tag(), "ignoring relay message");
            }
        }
    }

    /// Forwards a relay-delivered event unless its subscription is closed
    /// or the event was already delivered. Fires EOSE early once the
    /// subscription's seen set is past the threshold.
    async fn deliver_event(&self, subscription_id: String, event: Map<String, Value>) {
        if !self.subscriptions.contains(&subscription_id).await {
            return;
        }
        let Some(event_id) = event.get("id").and_then(Value::as_str) else {
            tracing::debug!(subscription = %subscription_id, "dropping relay event without id");
            return;
        };

        let sighting = self.dedup.observe(&subscription_id, event_id).await;
        if sighting.is_saturated() && self.eose.take(&subscription_id).await {
            self.emit(WireMessage::Eose {
                subscription_id: subscription_id.clone(),
            })
            .await;
        }
        if sighting.is_first() {
            self.emit(WireMessage::Event {
                subscription_id: Some(subscription_id),
                event,
            })
            .await;
        }
    }

    async fn emit(&self, message: WireMessage) {
        let tag = message.tag();
        if !self.outbound.push(message).await {
            tracing::debug!(
                client = %self.client,
                tag,
                client_gone = self.outbound.is_closed(),
                "outbound message dropped"
            );
        }
    }
}
