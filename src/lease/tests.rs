use super::*;
use crate::store::{self, Delivery, MessageStore};
use chrono::TimeZone;
use tokio::sync::mpsc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn secs(n: i64) -> TimeDelta {
    TimeDelta::seconds(n)
}

fn delivery(id: &str, ack_id: &str) -> Delivery {
    Delivery {
        id: id.to_string(),
        data: "{}".to_string(),
        ack_id: ack_id.to_string(),
        publish_time: t0(),
        attributes: Default::default(),
    }
}

#[test]
fn test_lease_boundary() {
    let timer = LeaseTimer::default();
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1")], t0());

    assert!(timer.is_ack_eligible(&store, "m1", t0() + secs(9)));
    assert!(timer.is_ack_eligible(&store, "m1", t0() + secs(10)));
    assert!(!timer.is_ack_eligible(&store, "m1", t0() + secs(10) + TimeDelta::milliseconds(1)));
    assert!(!timer.is_ack_eligible(&store, "m1", t0() + secs(11)));
}

#[test]
fn test_redelivery_renews_eligibility() {
    let timer = LeaseTimer::default();
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1")], t0());
    assert!(timer.is_ack_eligible(&store, "m1", t0() + secs(9)));
    assert!(!timer.is_ack_eligible(&store, "m1", t0() + secs(11)));

    store.reconcile_at([delivery("m1", "a2")], t0() + secs(11));

    assert!(timer.is_ack_eligible(&store, "m1", t0() + secs(11)));
    assert!(timer.is_ack_eligible(&store, "m1", t0() + secs(20)));
    assert!(timer.is_ack_eligible(&store, "m1", t0() + secs(21)));
    assert!(!timer.is_ack_eligible(&store, "m1", t0() + secs(22)));
}

#[test]
fn test_unknown_and_acknowledged_are_not_eligible() {
    let timer = LeaseTimer::default();
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1")], t0());
    store.finalize(["m1"]);

    assert!(!timer.is_ack_eligible(&store, "m1", t0()));
    assert!(!timer.is_ack_eligible(&store, "ghost", t0()));
    assert_eq!(
        timer.state_of(store.get("m1").unwrap(), t0()),
        LeaseState::Acknowledged
    );
}

#[test]
fn test_state_reports_remaining_time() {
    let timer = LeaseTimer::new(Duration::from_secs(10));
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1")], t0());
    let m1 = store.get("m1").unwrap();

    let state = timer.state_of(m1, t0() + secs(3));
    assert_eq!(state, LeaseState::Eligible { remaining: secs(7) });
    assert_eq!(state.remaining_secs(), 7);
    assert_eq!(timer.state_of(m1, t0() + secs(12)), LeaseState::Expired);
    assert_eq!(LeaseState::Expired.remaining_secs(), 0);
}

#[test]
fn test_evaluate_covers_pending_only() {
    let timer = LeaseTimer::default();
    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1"), delivery("m2", "b1")], t0());
    store.reconcile_at([delivery("m2", "b2")], t0() + secs(8));
    store.reconcile_at([delivery("m3", "c1")], t0());
    store.finalize(["m3"]);

    let eligibility = timer.evaluate(&store, t0() + secs(15));
    assert_eq!(eligibility.len(), 2);
    assert_eq!(eligibility.get("m1"), Some(&false));
    assert_eq!(eligibility.get("m2"), Some(&true));
}

#[test]
fn test_diff_reports_flips() {
    let last = HashMap::from([("m1".to_string(), true), ("m2".to_string(), false)]);
    let current = HashMap::from([
        ("m1".to_string(), false),
        ("m2".to_string(), true),
        ("m3".to_string(), true),
    ]);

    let event = diff(&last, &current);
    assert_eq!(event.expired, vec!["m1".to_string()]);
    assert_eq!(event.renewed, vec!["m2".to_string()]);
    assert_eq!(event.pending, 3);
    assert!(!diff(&current, &current).has_flips());
}

#[test]
fn test_oversized_window_is_clamped_and_clock_skew_saturates() {
    let timer = LeaseTimer::new(Duration::from_secs(u64::MAX));
    assert_eq!(timer.window(), TimeDelta::days(1));

    let mut store = MessageStore::new();
    store.reconcile_at([delivery("m1", "a1")], t0());
    let m1 = store.get("m1").unwrap();

    // Wall clock stepped back one second after the pull.
    let state = timer.state_of(m1, t0() - secs(1));
    assert_eq!(state, LeaseState::Eligible { remaining: timer.window() });

    let timer = LeaseTimer::default();
    assert_eq!(
        timer.state_of(m1, t0() - secs(30)),
        LeaseState::Eligible { remaining: secs(10) }
    );
}

#[test]
fn test_min_tombstone_ttl_scales_with_window() {
    assert_eq!(min_tombstone_ttl(LEASE_WINDOW), Duration::from_secs(60));
    assert_eq!(
        min_tombstone_ttl(Duration::from_secs(600)),
        Duration::from_secs(3600)
    );
    assert_eq!(
        min_tombstone_ttl(Duration::from_secs(u64::MAX)),
        MAX_LEASE_WINDOW * TOMBSTONE_WINDOWS
    );
}

#[tokio::test]
async fn test_spawned_timer_reports_expiry_and_prunes_tombstones() {
    let store = store::shared();
    store::lock(&store).reconcile([delivery("m1", "a1"), delivery("m2", "b1")]);
    // Older than six 100ms windows, so the first tick evicts it.
    store::lock(&store).finalize_at(["m2"], Utc::now() - secs(1));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let timer = LeaseTimer::new(Duration::from_millis(100));
    let _handle = timer.spawn(
        store.clone(),
        Duration::from_millis(20),
        Duration::from_millis(0),
        tx,
    );

    let event = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("lease tick did not fire")
            .expect("lease timer stopped");
        assert_eq!(event.pending, 1);
        if event.has_flips() {
            break event;
        }
    };
    assert_eq!(event.expired, vec!["m1".to_string()]);

    let guard = store::lock(&store);
    assert!(guard.get("m2").is_none(), "tombstone should be pruned");
    assert!(guard.get("m1").is_some());
}

#[tokio::test]
async fn test_spawned_timer_reports_countdown_and_keeps_fresh_tombstones() {
    let store = store::shared();
    store::lock(&store).reconcile([delivery("m1", "a1"), delivery("m2", "b1")]);
    store::lock(&store).finalize(["m1"]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let timer = LeaseTimer::new(Duration::from_secs(10));
    let _handle = timer.spawn(
        store.clone(),
        Duration::from_millis(10),
        Duration::from_millis(0),
        tx,
    );

    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("lease tick did not fire")
            .expect("lease timer stopped");
        assert!(!event.has_flips());
        assert_eq!(event.pending, 1);
    }
    assert!(
        store::lock(&store).get("m1").is_some(),
        "a zero ttl is raised to six lease windows"
    );
}
