use super::*;
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn delivery(id: &str, ack_id: &str, publish_time: DateTime<Utc>) -> Delivery {
    Delivery {
        id: id.to_string(),
        data: format!("{{\"id\":\"{id}\"}}"),
        ack_id: ack_id.to_string(),
        publish_time,
        attributes: Default::default(),
    }
}

fn visible(store: &MessageStore) -> Vec<String> {
    store.query(|_| true).iter().map(|m| m.id.clone()).collect()
}

#[test]
fn test_first_observation_inserts_pending_record() {
    let mut store = MessageStore::new();
    let summary = store.reconcile_at([delivery("m1", "a1", t0())], t0());

    assert_eq!(summary.inserted, 1);
    let m1 = store.get("m1").unwrap();
    assert_eq!(m1.status, MessageStatus::PendingAck);
    assert_eq!(m1.ack_id, "a1");
    assert_eq!(m1.pulled_at, t0());
    assert_eq!(m1.delivery_count, 1);
}

#[test]
fn test_duplicate_ack_id_only_refreshes_pulled_at() {
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1", t0())], t0());

    let later = t0() + Duration::seconds(4);
    let summary = store.reconcile_at([delivery("m1", "a1", t0())], later);

    assert_eq!(summary.refreshed, 1);
    let m1 = store.get("m1").unwrap();
    assert_eq!(m1.status, MessageStatus::PendingAck);
    assert_eq!(m1.ack_id, "a1");
    assert_eq!(m1.pulled_at, later);
    assert_eq!(m1.delivery_count, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_redelivery_adopts_new_ack_id_and_resets_clock() {
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1", t0())], t0());

    let later = t0() + Duration::seconds(47);
    let summary = store.reconcile_at([delivery("m1", "a2", t0())], later);

    assert_eq!(summary.redelivered, 1);
    let m1 = store.get("m1").unwrap();
    assert_eq!(m1.ack_id, "a2");
    assert_eq!(m1.pulled_at, later);
    assert_eq!(m1.delivery_count, 2);
    assert!(store.find_by_ack_id("a1").is_none());
    assert_eq!(store.find_by_ack_id("a2").unwrap().id, "m1");
}

#[test]
fn test_pulled_at_never_moves_backwards() {
    let mut store = MessageStore::new();
    let later = t0() + Duration::seconds(5);
    store.reconcile_at([delivery("m1", "a1", t0())], later);

    // A late-arriving response stamped with an older time.
    store.reconcile_at([delivery("m1", "a2", t0())], t0());

    let m1 = store.get("m1").unwrap();
    assert_eq!(m1.pulled_at, later);
    assert_eq!(m1.ack_id, "a2");
}

#[test]
fn test_finalize_is_terminal() {
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1", t0())], t0());
    assert_eq!(store.finalize_at(["m1"], t0()), 1);

    for (i, ack) in ["a1", "a2", "a3"].iter().enumerate() {
        let summary =
            store.reconcile_at([delivery("m1", ack, t0())], t0() + Duration::seconds(i as i64));
        assert_eq!(summary.ignored, 1);
    }

    let m1 = store.get("m1").unwrap();
    assert_eq!(m1.status, MessageStatus::Acknowledged);
    assert_eq!(m1.ack_id, "a1");
    assert!(visible(&store).is_empty());
}

#[test]
fn test_finalize_is_idempotent_and_ignores_unknown_ids() {
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1", t0())], t0());

    assert_eq!(store.finalize_at(["m1", "nope"], t0()), 1);
    assert_eq!(store.finalize_at(["m1"], t0()), 0);
    assert_eq!(store.get("m1").unwrap().acknowledged_at(), Some(t0()));
}

#[test]
fn test_acked_then_racing_duplicate_stays_hidden() {
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1", t0())], t0());
    store.finalize(["m1"]);

    // The in-flight pull that raced the ack still carries the old token.
    store.reconcile([delivery("m1", "a1", t0())]);

    assert!(visible(&store).is_empty());
    assert_eq!(store.pending_len(), 0);
}

#[test]
fn test_query_orders_by_publish_time_descending() {
    let mut store = MessageStore::new();
    store.reconcile_at(
        [
            delivery("old", "a1", t0()),
            delivery("new", "a2", t0() + Duration::seconds(30)),
            delivery("mid", "a3", t0() + Duration::seconds(10)),
        ],
        t0(),
    );

    assert_eq!(visible(&store), vec!["new", "mid", "old"]);
}

#[test]
fn test_redelivery_does_not_move_publish_time() {
    let mut store = MessageStore::new();
    store.reconcile_at(
        [
            delivery("m1", "a1", t0()),
            delivery("m2", "b1", t0() + Duration::seconds(1)),
        ],
        t0(),
    );
    let mut moved = delivery("m1", "a2", t0() + Duration::seconds(99));
    moved.data = "ignored".to_string();
    store.reconcile_at([moved], t0() + Duration::seconds(2));

    assert_eq!(visible(&store), vec!["m2", "m1"]);
    assert_eq!(store.get("m1").unwrap().publish_time, t0());
}

#[test]
fn test_query_is_lazy_and_restartable() {
    let mut store = MessageStore::new();
    store.reconcile_at(
        [
            delivery("m1", "a1", t0()),
            delivery("m2", "a2", t0() + Duration::seconds(1)),
            delivery("m3", "a3", t0() + Duration::seconds(2)),
        ],
        t0(),
    );
    store.finalize(["m2"]);

    let query = store.query(|m| m.id != "m3");
    let first: Vec<_> = query.iter().map(|m| m.id.as_str()).collect();
    let second: Vec<_> = (&query).into_iter().map(|m| m.id.as_str()).collect();
    assert_eq!(first, vec!["m1"]);
    assert_eq!(first, second);
    assert_eq!(query.count(), 1);
}

#[test]
fn test_prune_tombstones_keeps_pending_records() {
    let mut store = MessageStore::new();
    store.reconcile_at(
        [delivery("m1", "a1", t0()), delivery("m2", "a2", t0())],
        t0(),
    );
    store.finalize_at(["m1"], t0());

    assert_eq!(store.prune_tombstones(t0()), 0);
    assert_eq!(store.prune_tombstones(t0() + Duration::seconds(1)), 1);
    assert!(store.get("m1").is_none());
    assert!(store.get("m2").is_some());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_clear_forgets_everything() {
    let store = shared();
    lock(&store).reconcile_at([delivery("m1", "a1", t0())], t0());
    lock(&store).finalize(["m1"]);
    lock(&store).clear();

    let guard = lock(&store);
    assert!(guard.is_empty());
    assert_eq!(guard.pending_len(), 0);
}
