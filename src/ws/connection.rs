//! Client WebSocket connection loop.
//!
//! Bridges one client socket to its [`Session`]: a writer task drains the
//! session's outbound queue onto the socket while the read loop decodes
//! client frames and dispatches them as session operations.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::messages::WireMessage;
use crate::domain::Session;

/// Runs the read/write loop for a single client connection.
///
/// The session is destroyed when the client disconnects, the socket fails,
/// or the writer can no longer deliver.
pub async fn run_connection(
    socket: WebSocket,
    session: Arc<Session>,
    mut outbound: mpsc::Receiver<WireMessage>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_session = Arc::clone(&session);
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_session.terminated() => break,
                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    if let Err(err) = ws_tx.send(Message::text(message.to_json())).await {
                        tracing::debug!(
                            client = %writer_session.client(),
                            tag = message.tag(),
                            event = message.event_id(),
                            %err,
                            "client write failed"
                        );
                        break;
                    }
                }
            }
        }
        if let Err(err) = ws_tx.close().await {
            tracing::debug!(client = %writer_session.client(), %err, "client close failed");
        }
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_message(&session, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            _ = &mut writer => break,
        }
    }

    session.destroy().await;
    writer.abort();
    tracing::debug!(client = %session.client(), "ws connection closed");
}

/// Decodes one client frame and applies it to the session.
async fn handle_text_message(session: &Arc<Session>, text: &str) {
    let message = match WireMessage::decode(text) {
        Ok(message) => message,
        Err(err) => {
            if let Some(notice) = err.notice() {
                session.send_notice(notice).await;
            }
            return;
        }
    };

    match message {
        WireMessage::Req {
            subscription_id,
            filters,
        } => session.subscribe(subscription_id, filters).await,
        WireMessage::Close { subscription_id } => {
            session.unsubscribe(&subscription_id, true).await;
        }
        WireMessage::Event { event, .. } => {
            if let Err(err) = session.publish(event).await {
                tracing::debug!(client = %session.client(), %err, "publish rejected");
            }
        }
        other => {
            session
                .send_notice(format!("unsupported message type: {}", other.tag()))
                .await;
        }
    }
}
