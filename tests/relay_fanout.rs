//! Session behaviour against real WebSocket relays running in-process.

#![allow(clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use common::{
    Script, event, eventually, fast_config, next_outbound, outbound_within, session_for,
    spawn_relay, spawn_silent_listener,
};
use nostr_bouncer::config::SessionConfig;
use nostr_bouncer::domain::Session;
use nostr_bouncer::ws::messages::WireMessage;

fn eose(id: &str) -> WireMessage {
    WireMessage::Eose {
        subscription_id: id.to_string(),
    }
}

fn event_ids(messages: &[WireMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| m.event_id().map(str::to_string))
        .collect()
}

fn eose_count(messages: &[WireMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, WireMessage::Eose { .. }))
        .count()
}

fn object(value: Value) -> serde_json::Map<String, Value> {
    let Value::Object(map) = value else {
        panic!("expected a JSON object");
    };
    map
}

#[tokio::test]
async fn eose_is_merged_across_three_relays() {
    let mut a = spawn_relay(Script::stored(&[])).await;
    let b = spawn_relay(Script::stored(&[])).await;
    let c = spawn_relay(Script::stored(&[])).await;
    let (session, mut rx) = session_for(&[&a, &b, &c]);

    session.subscribe("s1".into(), vec![json!({"kinds":[1]})]).await;

    assert_eq!(next_outbound(&mut rx).await, eose("s1"));
    let rest = outbound_within(&mut rx, Duration::from_millis(300)).await;
    assert_eq!(eose_count(&rest), 0);

    assert_eq!(a.next_tagged("REQ").await, json!(["REQ", "s1", {"kinds":[1]}]));
    assert_eq!(a.next_user_agent().await, fast_config(&[&a]).user_agent);
    session.destroy().await;
}

#[tokio::test]
async fn redundant_deliveries_reach_the_client_once() {
    let a = spawn_relay(Script::stored(&["e1"])).await;
    let b = spawn_relay(Script::stored(&["e1", "e2"])).await;
    let (session, mut rx) = session_for(&[&a, &b]);

    session.subscribe("s1".into(), Vec::new()).await;

    let mut seen = Vec::new();
    loop {
        let message = next_outbound(&mut rx).await;
        let done = matches!(message, WireMessage::Eose { .. });
        seen.push(message);
        if done {
            break;
        }
    }
    seen.extend(outbound_within(&mut rx, Duration::from_millis(200)).await);

    let mut ids = event_ids(&seen);
    ids.sort();
    assert_eq!(ids, vec!["e1", "e2"]);
    assert_eq!(eose_count(&seen), 1);
    session.destroy().await;
}

#[tokio::test]
async fn server_errors_are_retried_until_accepted() {
    let flaky = spawn_relay(Script::refusing(2, 503)).await;
    let steady = spawn_relay(Script::stored(&["e1"])).await;
    let (session, mut rx) = session_for(&[&flaky, &steady]);

    session.subscribe("s1".into(), Vec::new()).await;

    // The steady relay is not held up by the flaky one.
    let first = next_outbound(&mut rx).await;
    assert_eq!(first.event_id(), Some("e1"));

    assert_eq!(next_outbound(&mut rx).await, eose("s1"));
    assert_eq!(flaky.handshakes(), 3);
    session.destroy().await;
}

#[tokio::test]
async fn rejected_relay_is_abandoned_while_others_continue() {
    let forbidden = spawn_relay(Script::refusing(usize::MAX, 403)).await;
    let steady = spawn_relay(Script::stored(&["e1"])).await;
    let (session, mut rx) = session_for(&[&forbidden, &steady]);

    session.subscribe("s1".into(), Vec::new()).await;

    let first = next_outbound(&mut rx).await;
    assert_eq!(first.event_id(), Some("e1"));

    let rest = outbound_within(&mut rx, Duration::from_millis(400)).await;
    assert_eq!(forbidden.handshakes(), 1);
    // Quorum still counts the rejected relay, so only the volume path could
    // complete this subscription.
    assert_eq!(eose_count(&rest), 0);
    assert_eq!(session.connected_relays().await, vec![steady.url.clone()]);
    session.destroy().await;
}

#[tokio::test]
async fn close_is_forwarded_and_confirmed() {
    let mut relay = spawn_relay(Script::silent()).await;
    let (session, mut rx) = session_for(&[&relay]);

    session.subscribe("s1".into(), Vec::new()).await;
    assert_eq!(relay.next_tagged("REQ").await, json!(["REQ", "s1"]));

    session.unsubscribe("s1", true).await;
    assert_eq!(
        next_outbound(&mut rx).await,
        WireMessage::Closed {
            subscription_id: "s1".into(),
            reason: String::new(),
        }
    );
    assert_eq!(relay.next_tagged("CLOSE").await, json!(["CLOSE", "s1"]));
    session.destroy().await;
}

#[tokio::test]
async fn publish_requires_an_event_id() {
    let mut relay = spawn_relay(Script::silent()).await;
    let (session, mut rx) = session_for(&[&relay]);

    assert!(session.publish(object(json!({"kind": 1}))).await.is_err());
    assert!(matches!(
        next_outbound(&mut rx).await,
        WireMessage::Notice { .. }
    ));

    let connected = &session;
    eventually(|| async move { !connected.connected_relays().await.is_empty() }).await;
    assert!(relay.stays_quiet(Duration::from_millis(200)).await);

    assert!(session.publish(object(event("e7"))).await.is_ok());
    assert_eq!(
        next_outbound(&mut rx).await,
        WireMessage::Ok {
            event_id: "e7".into(),
            accepted: true,
            message: String::new(),
        }
    );
    assert_eq!(relay.next_tagged("EVENT").await, json!(["EVENT", event("e7")]));
    session.destroy().await;
}

#[tokio::test]
async fn destroy_closes_relays_and_stops_reconnecting() {
    let mut relay = spawn_relay(Script::silent()).await;
    let (session, _rx) = session_for(&[&relay]);

    session.subscribe("s1".into(), Vec::new()).await;
    relay.next_tagged("REQ").await;

    session.destroy().await;
    session.terminated().await;

    let observed = &relay;
    eventually(|| async move { observed.disconnects() == 1 }).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(relay.handshakes(), 1);
    assert!(session.connected_relays().await.is_empty());
}

#[tokio::test]
async fn dropped_relay_is_redialed_and_subscriptions_replayed() {
    let mut relay = spawn_relay(Script::hanging_up_once()).await;
    let (session, _rx) = session_for(&[&relay]);

    session.subscribe("s1".into(), vec![json!({"limit": 10})]).await;
    relay.next_tagged("REQ").await;

    // The relay hangs up after the first REQ; the worker redials and
    // replays the open subscription on the new connection.
    assert_eq!(
        relay.next_tagged("REQ").await,
        json!(["REQ", "s1", {"limit": 10}])
    );
    assert_eq!(relay.handshakes(), 2);
    session.destroy().await;
}

#[tokio::test]
async fn destroy_aborts_a_handshake_in_flight() {
    let silent = spawn_silent_listener().await;
    let Ok(mut config) = SessionConfig::new([silent.url.as_str()]) else {
        panic!("valid relay url");
    };
    // Long enough that only cancellation can end the dial within the test.
    config.dial_timeout = Duration::from_secs(30);
    config.retry_interval = Duration::from_millis(50);
    let (session, _rx) = Session::new("integration-test", Arc::new(config));

    session.subscribe("s1".into(), Vec::new()).await;
    let pending = &silent;
    eventually(|| async move { pending.accepts() == 1 }).await;

    session.destroy().await;
    eventually(|| async move { pending.hangups() == 1 }).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(silent.accepts(), 1);
    assert!(session.connected_relays().await.is_empty());
}
