//! Ordered hand-off of messages destined for the client.
//!
//! [`OutboundQueue`] wraps a bounded [`tokio::sync::mpsc`] channel. Relay
//! workers and client operations push merged results; the client writer
//! drains the receiver in order. A push waits while the writer is slow but
//! gives up as soon as the session is torn down.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ws::messages::WireMessage;

/// Producer side of a session's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    sender: mpsc::Sender<WireMessage>,
    shutdown: CancellationToken,
}

impl OutboundQueue {
    /// Creates a queue holding at most `capacity` undelivered messages.
    ///
    /// Pushes are abandoned once `shutdown` is cancelled.
    #[must_use]
    pub fn new(capacity: usize, shutdown: CancellationToken) -> (Self, mpsc::Receiver<WireMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, shutdown }, receiver)
    }

    /// Appends a message, waiting for room if the consumer is behind.
    ///
    /// Returns `false` if the message was dropped because the consumer is
    /// gone or the session shut down first.
    pub async fn push(&self, message: WireMessage) -> bool {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            sent = self.sender.send(message) => sent.is_ok(),
        }
    }

    /// Returns `true` once the consumer has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
