//! Per-relay connection worker: dial, replay, read, reconnect.
//!
//! One worker runs per configured relay per session. It keeps at most one
//! connection to its relay alive until the session is destroyed or the
//! relay rejects the handshake with a non-retryable status.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::SplitStream;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use super::dial::{RelayStream, dial};
use crate::domain::{RelayConnection, Session};
use crate::error::BouncerError;
use crate::ws::messages::WireMessage;

/// Why a read loop ended.
enum Disconnect {
    /// The session closed the connection.
    Closed,
    /// The relay stream failed or ended.
    Lost(BouncerError),
}

/// Runs the worker for `url` until the session is destroyed or the relay
/// rejects us permanently.
pub async fn run(session: Arc<Session>, url: String) {
    let client = session.client().to_string();
    let retry = session.config().retry_interval;

    loop {
        let Some((attempt, cancel)) = session.dials().register().await else {
            return;
        };
        let outcome = dial(&url, session.config(), &cancel).await;
        session.dials().deregister(attempt).await;

        let stream = match outcome {
            Ok(Some(stream)) => stream,
            Ok(None) => return,
            Err(err) if err.is_retryable() => {
                tracing::warn!(%client, relay = %url, %err, retry_in = ?retry, "relay dial failed");
                if !pause(&session, retry).await {
                    return;
                }
                continue;
            }
            Err(err) => {
                tracing::error!(%client, relay = %url, %err, "relay refused; giving up on it");
                return;
            }
        };

        let (sink, mut reader) = stream.split();
        let connection = Arc::new(RelayConnection::new(url.as_str(), Box::pin(sink)));
        if !session.connections().insert(Arc::clone(&connection)).await {
            connection.shutdown().await;
            return;
        }
        tracing::info!(%client, relay = %url, "relay connected");

        session.replay_subscriptions(&connection).await;
        let disconnect = read_loop(&session, &connection, &mut reader).await;

        session.connections().remove(&connection).await;
        connection.shutdown().await;

        if session.is_destroyed() {
            tracing::info!(%client, relay = %url, "relay disconnected");
            return;
        }
        match disconnect {
            Disconnect::Closed => return,
            Disconnect::Lost(err) => {
                tracing::warn!(%client, relay = %url, %err, retry_in = ?retry, "relay connection lost");
            }
        }
        if !pause(&session, retry).await {
            return;
        }
    }
}

/// Sleeps for `retry`, returning `false` if the session was torn down
/// meanwhile.
async fn pause(session: &Session, retry: std::time::Duration) -> bool {
    tokio::select! {
        biased;
        () = session.terminated() => false,
        () = tokio::time::sleep(retry) => !session.is_destroyed(),
    }
}

/// Reads relay frames until the stream fails or the session closes the
/// connection, routing each decoded message into the session.
async fn read_loop(
    session: &Session,
    connection: &RelayConnection,
    reader: &mut SplitStream<RelayStream>,
) -> Disconnect {
    loop {
        let frame = tokio::select! {
            biased;
            () = connection.closed() => return Disconnect::Closed,
            frame = reader.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                return Disconnect::Lost(BouncerError::StreamRead(
                    "stream closed by relay".to_string(),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Disconnect::Lost(BouncerError::StreamRead(e.to_string())),
        };

        let value: Value = match serde_json::from_str(text.as_str()) {
            Ok(value) => value,
            Err(e) => {
                return Disconnect::Lost(BouncerError::StreamRead(format!(
                    "undecodable frame: {e}"
                )));
            }
        };
        if value.is_null() {
            continue;
        }

        match WireMessage::from_value(value) {
            Ok(message) => session.route_relay_message(connection.url(), message).await,
            Err(err) => {
                tracing::debug!(relay = %connection.url(), %err, "dropping relay frame");
            }
        }
    }
}
