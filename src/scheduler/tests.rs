use super::*;
use crate::store;
use crate::testing::{ScriptedBroker, delivery};
use tokio::sync::mpsc;

fn scheduler(broker: Arc<ScriptedBroker>) -> (Arc<PullScheduler>, SharedStore, Arc<Target>) {
    let store = store::shared();
    let target = Arc::new(Target::new(Some("orders-sub".to_string())));
    let scheduler = Arc::new(PullScheduler::new(
        broker,
        store.clone(),
        target.clone(),
        PullPolicy::default(),
    ));
    (scheduler, store, target)
}

#[test]
fn test_throttle_cycle() {
    let start = Instant::now();
    let mut throttle = Throttle::new(Duration::from_secs(10));

    assert!(throttle.try_begin(start).is_ok());
    assert!(throttle.in_flight());
    assert_eq!(throttle.try_begin(start), Err(Duration::ZERO));

    throttle.finish(start + Duration::from_secs(1));
    assert_eq!(
        throttle.try_begin(start + Duration::from_secs(4)),
        Err(Duration::from_secs(7))
    );
    assert!(throttle.try_begin(start + Duration::from_secs(11)).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_manual_pull_reconciles_batch() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_pull(Ok(vec![delivery("m1", "a1", 0), delivery("m2", "b1", 1)]));
    let (scheduler, store, _) = scheduler(broker);

    let outcome = scheduler.request_pull().await.unwrap();

    match outcome {
        PullOutcome::Completed { received, summary } => {
            assert_eq!(received, 2);
            assert_eq!(summary.inserted, 2);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(store::lock(&store).pending_len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_pull_rejected_during_cooldown() {
    let broker = Arc::new(ScriptedBroker::new());
    let (scheduler, _, _) = scheduler(broker.clone());

    scheduler.request_pull().await.unwrap();
    tokio::time::advance(Duration::from_secs(3)).await;

    let outcome = scheduler.request_pull().await.unwrap();
    assert_eq!(
        outcome,
        PullOutcome::Throttled {
            retry_in: Duration::from_secs(7)
        }
    );
    assert_eq!(broker.pull_count(), 1);

    tokio::time::advance(Duration::from_secs(7)).await;
    assert!(matches!(
        scheduler.request_pull().await.unwrap(),
        PullOutcome::Completed { .. }
    ));
    assert_eq!(broker.pull_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_pull_leaves_store_untouched_and_starts_cooldown() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_pull(Err(BrokerError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }));
    let (scheduler, store, _) = scheduler(broker);

    let err = scheduler.request_pull().await.unwrap_err();
    assert!(matches!(err, BrokerError::Status { status: 503, .. }));
    assert!(store::lock(&store).is_empty());
    assert!(scheduler.cooldown_remaining().is_some());
    assert!(matches!(
        scheduler.request_pull().await.unwrap(),
        PullOutcome::Throttled { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_pull_is_refused_while_in_flight() {
    let broker = Arc::new(ScriptedBroker::gated());
    broker.push_pull(Ok(vec![delivery("m1", "a1", 0)]));
    let (scheduler, store, _) = scheduler(broker.clone());

    let first = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.request_pull().await }
    });
    while broker.pull_count() == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        scheduler.pull(PullTrigger::AutoRefresh).await.unwrap(),
        PullOutcome::Throttled {
            retry_in: Duration::ZERO
        }
    );

    broker.release();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, PullOutcome::Completed { received: 1, .. }));
    assert_eq!(store::lock(&store).pending_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_response_for_previous_subscription_is_discarded() {
    let broker = Arc::new(ScriptedBroker::gated());
    broker.push_pull(Ok(vec![delivery("m1", "a1", 0)]));
    let (scheduler, store, target) = scheduler(broker.clone());

    let pending = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.request_pull().await }
    });
    while broker.pull_count() == 0 {
        tokio::task::yield_now().await;
    }
    target.select("audit-sub");
    broker.release();

    assert_eq!(pending.await.unwrap().unwrap(), PullOutcome::Stale);
    assert!(store::lock(&store).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_subscription_selected() {
    let broker = Arc::new(ScriptedBroker::new());
    let scheduler = PullScheduler::new(
        broker.clone(),
        store::shared(),
        Arc::new(Target::default()),
        PullPolicy::default(),
    );

    assert_eq!(
        scheduler.request_pull().await.unwrap(),
        PullOutcome::NoSubscription
    );
    assert_eq!(broker.pull_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_pull_releases_the_slot() {
    let broker = Arc::new(ScriptedBroker::gated());
    let (scheduler, _, _) = scheduler(broker.clone());

    let pending = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.request_pull().await }
    });
    while broker.pull_count() == 0 {
        tokio::task::yield_now().await;
    }
    pending.abort();
    let _ = pending.await;

    // The abandoned pull counts as finished: cooling down, not stuck in flight.
    tokio::time::advance(Duration::from_secs(10)).await;
    broker.release();
    assert!(matches!(
        scheduler.request_pull().await.unwrap(),
        PullOutcome::Completed { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_auto_refresh_shares_the_cooldown() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_pull(Ok(vec![delivery("m1", "a1", 0)]));
    broker.push_pull(Ok(vec![delivery("m2", "b1", 1)]));
    let (scheduler, store, _) = scheduler(broker.clone());

    // Manual pull at t=0 starts a 10s cooldown.
    scheduler.request_pull().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _auto = scheduler.spawn_auto_refresh(tx);

    // t=5: auto-refresh is refused by the same cooldown.
    let report = rx.recv().await.unwrap();
    assert_eq!(report.trigger, PullTrigger::AutoRefresh);
    assert!(matches!(
        report.result,
        Ok(PullOutcome::Throttled { retry_in }) if retry_in == Duration::from_secs(5)
    ));
    assert_eq!(broker.pull_count(), 1);

    // t=10: cooldown over, auto-refresh pulls.
    let report = rx.recv().await.unwrap();
    assert!(matches!(
        report.result,
        Ok(PullOutcome::Completed { received: 1, .. })
    ));
    assert_eq!(store::lock(&store).pending_len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_auto_refresh_stops_when_handle_dropped() {
    let broker = Arc::new(ScriptedBroker::new());
    let (scheduler, _, _) = scheduler(broker.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let auto = scheduler.spawn_auto_refresh(tx);
    rx.recv().await.unwrap();
    drop(auto);

    assert!(rx.recv().await.is_none());
    assert_eq!(broker.pull_count(), 1);
}
