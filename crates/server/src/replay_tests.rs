// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::fingerprint::fingerprint;

fn cached(check: ReplayCheck) -> Response {
    match check {
        ReplayCheck::Cached(r) => r,
        _ => panic!("expected a cached replay"),
    }
}

fn conflicted(check: ReplayCheck) -> Response {
    match check {
        ReplayCheck::Conflict(r) => r,
        _ => panic!("expected a conflict"),
    }
}

fn store() -> ReplayStore {
    ReplayStore::new(ReplayConfig {
        max_outcomes: 3,
        max_in_flight: 2,
        idempotency_ttl: Duration::from_secs(300),
    })
}

fn cmd(raw: serde_json::Value) -> Command {
    serde_json::from_value(raw).expect("valid command json")
}

fn outcome_for(cmd: &Command, command_id: &str, response: Response) -> CommandOutcome {
    CommandOutcome {
        command_id: command_id.to_owned(),
        kind: cmd.kind.clone(),
        lane: "server".to_owned(),
        fingerprint: fingerprint(cmd),
        success: response.success,
        error: response.error.clone(),
        response,
        session_version: None,
        finished_at: SystemTime::now(),
    }
}

fn ready_future(response: Response) -> ResponseFuture {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(response);
    response_future(rx, "prompt")
}

fn record_for(cmd: &Command, lane: &str, future: ResponseFuture) -> InFlightRecord {
    InFlightRecord {
        kind: cmd.kind.clone(),
        lane: lane.to_owned(),
        fingerprint: fingerprint(cmd),
        future,
    }
}

#[test]
fn synthetic_ids_are_unique_and_reserved() {
    let store = store();
    let anonymous = cmd(serde_json::json!({"type": "list_sessions"}));
    let (a, synthetic_a) = store.get_or_create_command_id(&anonymous);
    let (b, synthetic_b) = store.get_or_create_command_id(&anonymous);
    assert!(synthetic_a && synthetic_b);
    assert_ne!(a, b);
    assert!(a.starts_with(SYNTHETIC_ID_PREFIX));

    let explicit = cmd(serde_json::json!({"type": "list_sessions", "id": "c1"}));
    assert_eq!(store.get_or_create_command_id(&explicit), ("c1".to_owned(), false));
}

#[test]
fn unseen_command_proceeds() {
    let store = store();
    let c = cmd(serde_json::json!({"type": "list_sessions", "id": "c1"}));
    assert!(matches!(store.check_replay(&c, "c1", &fingerprint(&c)), ReplayCheck::Proceed));
}

#[test]
fn stored_outcome_replays_verbatim_with_adjusted_id() {
    let store = store();
    let original = cmd(serde_json::json!({"type": "list_sessions", "id": "c1"}));
    let response = Response::ok("list_sessions", Some(serde_json::json!({"sessions": []})))
        .with_id(Some("c1".to_owned()));
    store.store_outcome(outcome_for(&original, "c1", response.clone()));

    let replayed = cached(store.check_replay(&original, "c1", &fingerprint(&original)));
    assert_eq!(replayed.replayed, Some(true));
    assert_eq!(replayed.id.as_deref(), Some("c1"));
    assert_eq!(replayed.data, response.data);

    // The stored record is untouched by the replay adjustments.
    let again = cached(store.check_replay(&original, "c1", &fingerprint(&original)));
    assert_eq!(again, replayed);
}

#[test]
fn same_id_different_content_conflicts() {
    let store = store();
    let original = cmd(serde_json::json!({"type": "list_sessions", "id": "c1"}));
    store.store_outcome(outcome_for(&original, "c1", Response::ok("list_sessions", None)));

    let changed = cmd(serde_json::json!({"type": "list_stored_sessions", "id": "c1"}));
    let conflict = conflicted(store.check_replay(&changed, "c1", &fingerprint(&changed)));
    assert!(!conflict.success);
    assert!(conflict.error.unwrap_or_default().contains("c1"));
}

#[test]
fn in_flight_hit_shares_the_same_future() {
    let store = store();
    let c = cmd(serde_json::json!({"type": "prompt", "sessionId": "s1", "id": "c1", "text": "x"}));
    let future = ready_future(Response::ok("prompt", None));
    assert!(store.register_in_flight("c1", record_for(&c, "session:s1", future)));

    let hit = match store.check_replay(&c, "c1", &fingerprint(&c)) {
        ReplayCheck::InFlight(f) => f,
        _ => panic!("expected in-flight"),
    };
    let response = futures_util::future::FutureExt::now_or_never(hit);
    assert!(response.is_some());
}

#[test]
fn in_flight_different_content_conflicts() {
    let store = store();
    let c = cmd(serde_json::json!({"type": "prompt", "sessionId": "s1", "id": "c1", "text": "x"}));
    let future = ready_future(Response::ok("prompt", None));
    assert!(store.register_in_flight("c1", record_for(&c, "session:s1", future)));

    let changed =
        cmd(serde_json::json!({"type": "prompt", "sessionId": "s1", "id": "c1", "text": "y"}));
    assert!(matches!(
        store.check_replay(&changed, "c1", &fingerprint(&changed)),
        ReplayCheck::Conflict(_)
    ));
}

#[test]
fn in_flight_cap_rejects_never_evicts() {
    let store = store();
    let c = cmd(serde_json::json!({"type": "list_sessions"}));
    let record = || record_for(&c, "server", ready_future(Response::ok("list_sessions", None)));
    assert!(store.register_in_flight("a", record()));
    assert!(store.register_in_flight("b", record()));
    assert!(!store.register_in_flight("c", record()), "cap reached: reject");
    // Existing registrations survive and re-registration is idempotent.
    assert!(store.register_in_flight("a", record()));
    assert_eq!(store.metrics().in_flight, 2);

    store.unregister_in_flight("a");
    assert!(store.register_in_flight("c", record()));
}

#[test]
fn idempotency_key_replays_and_conflicts() {
    let store = store();
    let original = cmd(serde_json::json!({
        "type": "list_sessions", "id": "c1", "idempotencyKey": "k1"
    }));
    let response = Response::ok("list_sessions", Some(serde_json::json!({"n": 1})));
    store.cache_idempotency("k1", "list_sessions", fingerprint(&original), response.clone());

    // Same content, different id, same key: replay.
    let retry = cmd(serde_json::json!({
        "type": "list_sessions", "id": "c2", "idempotencyKey": "k1"
    }));
    let replayed = cached(store.check_replay(&retry, "c2", &fingerprint(&retry)));
    assert_eq!(replayed.id.as_deref(), Some("c2"));
    assert_eq!(replayed.replayed, Some(true));
    assert_eq!(replayed.data, response.data);

    // Different content under the same key: conflict.
    let conflicting = cmd(serde_json::json!({
        "type": "list_stored_sessions", "id": "c3", "idempotencyKey": "k1"
    }));
    let conflict =
        conflicted(store.check_replay(&conflicting, "c3", &fingerprint(&conflicting)));
    assert!(conflict.error.unwrap_or_default().contains("k1"));
}

#[test]
fn idempotency_entries_expire() {
    let store = ReplayStore::new(ReplayConfig {
        max_outcomes: 10,
        max_in_flight: 10,
        idempotency_ttl: Duration::ZERO,
    });
    let c = cmd(serde_json::json!({"type": "list_sessions", "id": "c1", "idempotencyKey": "k1"}));
    store.cache_idempotency("k1", "list_sessions", fingerprint(&c), Response::ok("list_sessions", None));

    // TTL of zero: the entry is dead on arrival.
    assert!(matches!(store.check_replay(&c, "c2", &fingerprint(&c)), ReplayCheck::Proceed));
    store.cleanup_idempotency();
    assert_eq!(store.metrics().idempotency_entries, 0);
}

#[test]
fn outcome_fifo_eviction() {
    let store = store();
    for i in 0..5 {
        let id = format!("c{i}");
        let c = cmd(serde_json::json!({"type": "list_sessions", "id": id}));
        store.store_outcome(outcome_for(&c, &id, Response::ok("list_sessions", None)));
    }
    assert_eq!(store.metrics().outcomes, 3);
    // The oldest two were evicted; the newest three replay.
    let c0 = cmd(serde_json::json!({"type": "list_sessions", "id": "c0"}));
    assert!(matches!(store.check_replay(&c0, "c0", &fingerprint(&c0)), ReplayCheck::Proceed));
    let c4 = cmd(serde_json::json!({"type": "list_sessions", "id": "c4"}));
    assert!(matches!(store.check_replay(&c4, "c4", &fingerprint(&c4)), ReplayCheck::Cached(_)));
}

#[test]
fn outcomes_are_write_once() {
    let store = store();
    let c = cmd(serde_json::json!({"type": "list_sessions", "id": "c1"}));
    store.store_outcome(outcome_for(&c, "c1", Response::ok("list_sessions", None)));
    store.store_outcome(outcome_for(&c, "c1", Response::fail("list_sessions", "late loser")));

    let replayed = cached(store.check_replay(&c, "c1", &fingerprint(&c)));
    assert!(replayed.success, "first write wins");
}

#[test]
fn dependency_lookup_views() {
    let store = store();
    let c = cmd(serde_json::json!({"type": "prompt", "sessionId": "s1", "id": "dep", "text": "x"}));
    assert!(matches!(store.lookup_dependency("dep"), DependencyLookup::Unknown));

    let future = ready_future(Response::ok("prompt", None));
    assert!(store.register_in_flight("dep", record_for(&c, "session:s1", future)));
    match store.lookup_dependency("dep") {
        DependencyLookup::InFlight { lane, .. } => assert_eq!(lane, "session:s1"),
        _ => panic!("expected in-flight"),
    }

    store.unregister_in_flight("dep");
    store.store_outcome(outcome_for(&c, "dep", Response::fail("prompt", "model exploded")));
    match store.lookup_dependency("dep") {
        DependencyLookup::Completed { success, error } => {
            assert!(!success);
            assert_eq!(error.as_deref(), Some("model exploded"));
        }
        _ => panic!("expected completed"),
    }
}
