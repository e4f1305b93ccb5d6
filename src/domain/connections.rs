//! Established relay connections of one session and fan-out writes.
//!
//! [`RelayConnection`] owns the write half of a relay stream behind its own
//! lock, so a relay never sees two interleaved writes while different
//! relays are written concurrently. [`ConnectionTable`] holds at most one
//! connection per relay URL; it snapshots its entries before any write so
//! the table lock is never held together with a connection's write lock.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::{Sink, SinkExt};
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{BouncerError, BouncerResult};
use crate::ws::messages::WireMessage;

/// Upper bound on sending a close frame to a relay that is going away.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Type-erased write half of a relay stream.
pub type RelaySink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// One live connection to a relay.
pub struct RelayConnection {
    url: String,
    sink: Mutex<RelaySink>,
    closed: CancellationToken,
}

impl fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RelayConnection {
    /// Wraps the write half of a freshly established relay stream.
    #[must_use]
    pub fn new(url: impl Into<String>, sink: RelaySink) -> Self {
        Self {
            url: url.into(),
            sink: Mutex::new(sink),
            closed: CancellationToken::new(),
        }
    }

    /// Relay URL this connection was dialed to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Writes one message, serialized against other writes to this relay.
    ///
    /// # Errors
    ///
    /// Returns [`BouncerError::StreamWrite`] if the stream rejects the frame.
    pub async fn send(&self, message: &WireMessage) -> BouncerResult<()> {
        let frame = Message::text(message.to_json());
        self.sink
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| BouncerError::StreamWrite(e.to_string()))
    }

    /// Asks the owning worker to stop reading and drop the connection.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Returns `true` once [`RelayConnection::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves when the connection has been asked to close.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Marks the connection closed and sends a close frame, bounded by a
    /// short grace period.
    pub async fn shutdown(&self) {
        self.closed.cancel();
        let mut sink = self.sink.lock().await;
        if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
            tracing::debug!(relay = %self.url, "close frame timed out");
        }
    }

    /// Builds a connection whose writes land on an in-memory channel.
    #[cfg(test)]
    pub(crate) fn recording(
        url: &str,
    ) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = futures_util::sink::unfold(tx, |tx, frame: Message| async move {
            tx.send(frame)
                .map_err(|_| tungstenite::Error::ConnectionClosed)?;
            Ok::<_, tungstenite::Error>(tx)
        });
        (Arc::new(Self::new(url, Box::pin(sink))), rx)
    }
}

#[derive(Debug, Default)]
struct TableState {
    connections: HashMap<String, Arc<RelayConnection>>,
    closed: bool,
}

/// Currently established relay connections, keyed by relay URL.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    state: RwLock<TableState>,
}

impl ConnectionTable {
    /// Creates an empty, open table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connection`.
    ///
    /// Returns `false` if the table was closed by teardown or the relay
    /// already has a live connection; the caller must then drop it.
    pub async fn insert(&self, connection: Arc<RelayConnection>) -> bool {
        let mut state = self.state.write().await;
        if state.closed || state.connections.contains_key(connection.url()) {
            return false;
        }
        state
            .connections
            .insert(connection.url().to_string(), connection);
        true
    }

    /// Removes `connection` if it is still the registered one for its URL.
    pub async fn remove(&self, connection: &Arc<RelayConnection>) -> bool {
        let mut state = self.state.write().await;
        let registered = state
            .connections
            .get(connection.url())
            .is_some_and(|current| Arc::ptr_eq(current, connection));
        if registered {
            state.connections.remove(connection.url());
        }
        registered
    }

    /// Returns the registered connections without holding the lock.
    pub async fn snapshot(&self) -> Vec<Arc<RelayConnection>> {
        self.state
            .read()
            .await
            .connections
            .values()
            .map(Arc::clone)
            .collect()
    }

    /// Sorted URLs of the connected relays.
    pub async fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .state
            .read()
            .await
            .connections
            .keys()
            .cloned()
            .collect();
        urls.sort();
        urls
    }

    /// Number of connected relays.
    pub async fn len(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Returns `true` if no relay is connected.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.connections.is_empty()
    }

    /// Sends `message` to every connected relay concurrently.
    ///
    /// Write failures are logged and otherwise ignored; the affected
    /// relay's worker notices the broken stream on its next read. Returns
    /// the number of relays the message was written to.
    pub async fn broadcast(&self, message: &WireMessage) -> usize {
        let connections = self.snapshot().await;
        let writes = connections.iter().map(|connection| async move {
            match connection.send(message).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(relay = %connection.url(), %err, "broadcast write failed");
                    false
                }
            }
        });
        join_all(writes).await.into_iter().filter(|ok| *ok).count()
    }

    /// Closes every connection and refuses future registrations.
    ///
    /// Returns the number of connections that were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<RelayConnection>> = {
            let mut state = self.state.write().await;
            state.closed = true;
            state.connections.drain().map(|(_, c)| c).collect()
        };
        for connection in &drained {
            connection.close();
        }
        drained.len()
    }
}
