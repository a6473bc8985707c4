// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::protocol::Response;

fn frame() -> ServerFrame {
    ServerFrame::from(Response::ok("list_sessions", None))
}

fn event(session: &str) -> ServerFrame {
    ServerFrame::Event {
        session_id: session.to_owned(),
        event: serde_json::json!({"kind": "tick"}),
    }
}

#[tokio::test]
async fn broadcast_all_reaches_every_client() {
    let hub = SubscriberHub::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    hub.register("a", tx_a);
    hub.register("b", tx_b);

    hub.broadcast_all(&frame());
    assert!(rx_a.recv().await.is_some());
    assert!(rx_b.recv().await.is_some());
}

#[tokio::test]
async fn session_frames_only_reach_subscribers() {
    let hub = SubscriberHub::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    hub.register("a", tx_a);
    hub.register("b", tx_b);
    assert!(hub.subscribe("a", "s1"));

    hub.broadcast_session("s1", &event("s1"));
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_err());
}

#[test]
fn subscribe_unknown_client_fails() {
    let hub = SubscriberHub::new();
    assert!(!hub.subscribe("ghost", "s1"));
}

#[tokio::test]
async fn broken_subscriber_does_not_block_others() {
    let hub = SubscriberHub::new();
    let (tx_dead, rx_dead) = mpsc::unbounded_channel();
    drop(rx_dead);
    let (tx_live, mut rx_live) = mpsc::unbounded_channel();
    hub.register("dead", tx_dead);
    hub.register("live", tx_live);

    hub.broadcast_all(&frame());
    assert!(rx_live.recv().await.is_some());
}

#[tokio::test]
async fn remove_session_clears_subscriptions() {
    let hub = SubscriberHub::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.register("a", tx);
    assert!(hub.subscribe("a", "s1"));
    assert_eq!(hub.metrics().session_subscriptions, 1);

    hub.remove_session("s1");
    hub.broadcast_session("s1", &event("s1"));
    assert!(rx.try_recv().is_err());
    assert_eq!(hub.metrics().session_subscriptions, 0);
}

#[test]
fn reregister_replaces_the_sender() {
    let hub = SubscriberHub::new();
    let (tx_old, rx_old) = mpsc::unbounded_channel();
    drop(rx_old);
    hub.register("a", tx_old);
    assert!(hub.subscribe("a", "s1"));

    let (tx_new, mut rx_new) = mpsc::unbounded_channel();
    hub.register("a", tx_new);
    // Subscriptions survive a reconnect.
    hub.broadcast_session("s1", &event("s1"));
    assert!(rx_new.try_recv().is_ok());
}

#[test]
fn unregister_forgets_the_client() {
    let hub = SubscriberHub::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    hub.register("a", tx);
    hub.unregister("a");
    assert_eq!(hub.metrics().subscribers, 0);
}
