//! In-process relays and session helpers shared by the integration tests.

#![allow(dead_code, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use nostr_bouncer::config::SessionConfig;
use nostr_bouncer::domain::Session;
use nostr_bouncer::ws::messages::WireMessage;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// How a fake relay behaves.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Refuse this many handshakes before accepting.
    pub reject_first: usize,
    /// Status used when refusing a handshake.
    pub reject_status: u16,
    /// Events sent in reply to every REQ, before the EOSE.
    pub events: Vec<Value>,
    /// Send EOSE after the events.
    pub eose: bool,
    /// Close the first accepted connection right after its first REQ.
    pub hang_up_once: bool,
}

impl Script {
    pub fn stored(events: &[&str]) -> Self {
        Self {
            events: events.iter().map(|id| event(id)).collect(),
            eose: true,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn hanging_up_once() -> Self {
        Self {
            hang_up_once: true,
            ..Self::default()
        }
    }

    pub fn refusing(times: usize, status: u16) -> Self {
        Self {
            reject_first: times,
            reject_status: status,
            eose: true,
            ..Self::default()
        }
    }
}

/// A relay listening on a loopback port.
#[derive(Debug)]
pub struct FakeRelay {
    pub url: String,
    handshakes: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    frames: mpsc::UnboundedReceiver<Value>,
    user_agents: mpsc::UnboundedReceiver<String>,
}

pub fn event(id: &str) -> Value {
    json!({"id": id, "kind": 1, "content": "hello"})
}

pub async fn spawn_relay(script: Script) -> FakeRelay {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind fake relay");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("fake relay addr");
    };
    let handshakes = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let (frame_tx, frames) = mpsc::unbounded_channel();
    let (agent_tx, user_agents) = mpsc::unbounded_channel();

    let counter = Arc::clone(&handshakes);
    let closed = Arc::clone(&disconnects);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            let script = script.clone();
            let frame_tx = frame_tx.clone();
            let agent_tx = agent_tx.clone();
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                let reject = attempt < script.reject_first;
                let status = script.reject_status;
                let callback = move |request: &Request, response: Response| {
                    if let Some(agent) = request
                        .headers()
                        .get("user-agent")
                        .and_then(|v| v.to_str().ok())
                    {
                        let _ = agent_tx.send(agent.to_string());
                    }
                    if reject {
                        let mut refusal = ErrorResponse::new(None);
                        *refusal.status_mut() =
                            StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN);
                        return Err(refusal);
                    }
                    Ok(response)
                };
                let Ok(mut ws) = accept_hdr_async(tcp, callback).await else {
                    return;
                };

                while let Some(Ok(frame)) = ws.next().await {
                    let Message::Text(text) = frame else {
                        continue;
                    };
                    let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let _ = frame_tx.send(value.clone());
                    if value.get(0) != Some(&json!("REQ")) {
                        continue;
                    }
                    if script.hang_up_once && attempt == script.reject_first {
                        let _ = ws.close(None).await;
                        break;
                    }
                    let subscription = value.get(1).cloned().unwrap_or(Value::Null);
                    for stored in &script.events {
                        let frame = json!(["EVENT", subscription, stored]).to_string();
                        if ws.send(Message::text(frame)).await.is_err() {
                            break;
                        }
                    }
                    if script.eose {
                        let frame = json!(["EOSE", subscription]).to_string();
                        let _ = ws.send(Message::text(frame)).await;
                    }
                }
                closed.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    FakeRelay {
        url: format!("ws://{addr}"),
        handshakes,
        disconnects,
        frames,
        user_agents,
    }
}

impl FakeRelay {
    /// Handshake attempts seen so far, accepted or refused.
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Accepted connections that have since ended.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Next JSON frame the bouncer wrote to this relay.
    pub async fn next_frame(&mut self) -> Value {
        let Ok(Some(frame)) = tokio::time::timeout(WAIT, self.frames.recv()).await else {
            panic!("no frame reached {}", self.url);
        };
        frame
    }

    /// Skips frames until one with `tag` arrives.
    pub async fn next_tagged(&mut self, tag: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame.get(0) == Some(&json!(tag)) {
                return frame;
            }
        }
    }

    /// Returns `true` if nothing is written to this relay within `window`.
    pub async fn stays_quiet(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.frames.recv()).await.is_err()
    }

    /// `User-Agent` of the next handshake.
    pub async fn next_user_agent(&mut self) -> String {
        let Ok(Some(agent)) = tokio::time::timeout(WAIT, self.user_agents.recv()).await else {
            panic!("no handshake reached {}", self.url);
        };
        agent
    }
}

/// A TCP listener that accepts connections but never answers the
/// WebSocket handshake.
#[derive(Debug)]
pub struct SilentListener {
    pub url: String,
    accepts: Arc<AtomicUsize>,
    hangups: Arc<AtomicUsize>,
}

pub async fn spawn_silent_listener() -> SilentListener {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind silent listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("silent listener addr");
    };
    let accepts = Arc::new(AtomicUsize::new(0));
    let hangups = Arc::new(AtomicUsize::new(0));

    let accepted = Arc::clone(&accepts);
    let hung_up = Arc::clone(&hangups);
    tokio::spawn(async move {
        while let Ok((mut tcp, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            let hung_up = Arc::clone(&hung_up);
            tokio::spawn(async move {
                let mut buf = [0_u8; 1024];
                while let Ok(read) = tcp.read(&mut buf).await {
                    if read == 0 {
                        break;
                    }
                }
                hung_up.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    SilentListener {
        url: format!("ws://{addr}"),
        accepts,
        hangups,
    }
}

impl SilentListener {
    /// TCP connections accepted so far.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Accepted connections the peer has since dropped.
    pub fn hangups(&self) -> usize {
        self.hangups.load(Ordering::SeqCst)
    }
}

/// Session configuration with test-friendly timings.
pub fn fast_config(relays: &[&FakeRelay]) -> SessionConfig {
    let Ok(mut config) = SessionConfig::new(relays.iter().map(|r| r.url.as_str())) else {
        panic!("valid relay urls");
    };
    config.retry_interval = Duration::from_millis(50);
    config.dial_timeout = Duration::from_secs(2);
    config
}

pub fn session_for(relays: &[&FakeRelay]) -> (Arc<Session>, mpsc::Receiver<WireMessage>) {
    Session::new("integration-test", Arc::new(fast_config(relays)))
}

/// Next message the session hands to the client.
pub async fn next_outbound(rx: &mut mpsc::Receiver<WireMessage>) -> WireMessage {
    let Ok(Some(message)) = tokio::time::timeout(WAIT, rx.recv()).await else {
        panic!("session produced no message");
    };
    message
}

/// Everything the session hands to the client within `window`.
pub async fn outbound_within(
    rx: &mut mpsc::Receiver<WireMessage>,
    window: Duration,
) -> Vec<WireMessage> {
    let mut out = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(message)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        out.push(message);
    }
    out
}

/// Waits until `check` holds, polling every few milliseconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let waited = tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if waited.is_err() {
        panic!("condition not reached in time");
    }
}
