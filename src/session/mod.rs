//! One dashboard session.
//!
//! A `Session` is the unit of state behind a single dashboard connection. It
//! owns the message store, the selected subscription, the pull scheduler, the
//! acknowledger and the background tasks (lease ticks and, when enabled,
//! auto-refresh). Nothing is shared between sessions; dropping a session
//! cancels its timers and any broker call it still has in flight.
//!
//! A session may also carry a `LogSource` for browsing function logs.
//!
//! Broker calls never block the caller. Each operation is spawned and its
//! result comes back through `Session::next_event`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;

use crate::ack::{AckOutcome, Acknowledger};
use crate::broker::{BrokerClient, TopicInfo};
use crate::filter::MessageFilter;
use crate::lease::{LEASE_WINDOW, LeaseEvent, LeaseState, LeaseTimer, TICK, min_tombstone_ttl};
use crate::logs::{FunctionInfo, LogPage, LogQuery, LogSource};
use crate::scheduler::{PullPolicy, PullReport, PullScheduler, PullTrigger};
use crate::store::{self, AckId, Message, MessageId, SharedStore};
use crate::target::Target;
use crate::utils::error::{BrokerError, LogsError};
use crate::utils::task::TaskHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub lease_window: Duration,
    pub lease_tick: Duration,
    /// How long acknowledged tombstones are kept before eviction.
    pub tombstone_ttl: Duration,
    pub pull: PullPolicy,
    /// Subscription selected when the session starts.
    pub subscription: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            lease_window: LEASE_WINDOW,
            lease_tick: TICK,
            tombstone_ttl: min_tombstone_ttl(LEASE_WINDOW),
            pull: PullPolicy::default(),
            subscription: None,
        }
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    Pulled(PullReport),
    Acked {
        ack_id: AckId,
        result: Result<AckOutcome, BrokerError>,
    },
    /// The lease ran out before the user acknowledged; nothing was sent.
    AckRefused { id: MessageId },
    Lease(LeaseEvent),
    Topics(Result<Vec<TopicInfo>, BrokerError>),
    Subscriptions {
        topic: String,
        result: Result<Vec<String>, BrokerError>,
    },
    Published {
        topic: String,
        result: Result<String, BrokerError>,
    },
    Logs(Result<LogPage, LogsError>),
}

/// A pending message as rendered to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub data: String,
    /// `data` parsed as JSON, when it is JSON.
    pub payload: Option<Value>,
    pub ack_id: AckId,
    pub publish_time: DateTime<Utc>,
    pub pulled_at: DateTime<Utc>,
    pub delivery_count: u32,
    pub attributes: BTreeMap<String, String>,
    pub ack_eligible: bool,
    pub lease_remaining_secs: i64,
}

impl MessageView {
    fn new(message: &Message, lease: LeaseState) -> Self {
        Self {
            id: message.id.clone(),
            data: message.data.clone(),
            payload: serde_json::from_str(&message.data).ok(),
            ack_id: message.ack_id.clone(),
            publish_time: message.publish_time,
            pulled_at: message.pulled_at,
            delivery_count: message.delivery_count,
            attributes: message.attributes.clone(),
            ack_eligible: lease.is_eligible(),
            lease_remaining_secs: lease.remaining_secs(),
        }
    }
}

/// Countdown of one pending message, sent on ticks that flipped nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseView {
    pub id: MessageId,
    pub ack_eligible: bool,
    pub lease_remaining_secs: i64,
}

pub struct Session {
    broker: Arc<dyn BrokerClient>,
    store: SharedStore,
    target: Arc<Target>,
    lease: LeaseTimer,
    scheduler: Arc<PullScheduler>,
    acknowledger: Arc<Acknowledger>,
    filter: MessageFilter,
    logs: Option<Arc<dyn LogSource>>,

    ops: JoinSet<()>,
    events_tx: UnboundedSender<SessionEvent>,
    events: UnboundedReceiver<SessionEvent>,
    pulls_tx: UnboundedSender<PullReport>,
    pulls: UnboundedReceiver<PullReport>,
    lease_events: UnboundedReceiver<LeaseEvent>,

    _lease_task: TaskHandle,
    auto_refresh: Option<TaskHandle>,
}

impl Session {
    /// Must be called from within a tokio runtime; the lease timer starts
    /// immediately.
    pub fn new(broker: Arc<dyn BrokerClient>, settings: SessionSettings) -> Self {
        let store = store::shared();
        let target = Arc::new(Target::new(settings.subscription.clone()));
        let lease = LeaseTimer::new(settings.lease_window);
        let scheduler = Arc::new(PullScheduler::new(
            broker.clone(),
            store.clone(),
            target.clone(),
            settings.pull,
        ));
        let acknowledger = Arc::new(Acknowledger::new(
            broker.clone(),
            store.clone(),
            target.clone(),
        ));

        let (events_tx, events) = mpsc::unbounded_channel();
        let (pulls_tx, pulls) = mpsc::unbounded_channel();
        let (lease_tx, lease_events) = mpsc::unbounded_channel();
        let lease_task = lease.spawn(
            store.clone(),
            settings.lease_tick,
            settings.tombstone_ttl,
            lease_tx,
        );

        Self {
            broker,
            store,
            target,
            lease,
            scheduler,
            acknowledger,
            filter: MessageFilter::default(),
            logs: None,
            ops: JoinSet::new(),
            events_tx,
            events,
            pulls_tx,
            pulls,
            lease_events,
            _lease_task: lease_task,
            auto_refresh: None,
        }
    }

    pub fn with_logs(mut self, logs: Arc<dyn LogSource>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn logs_enabled(&self) -> bool {
        self.logs.is_some()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn subscription(&self) -> Option<String> {
        self.target.subscription()
    }

    pub fn filter(&self) -> &MessageFilter {
        &self.filter
    }

    pub fn auto_refresh_enabled(&self) -> bool {
        self.auto_refresh.is_some()
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.scheduler.cooldown_remaining()
    }

    /// Switch to another subscription. The store is cleared and responses to
    /// calls made for the previous subscription are dropped on arrival.
    pub fn select_subscription(&mut self, subscription: &str) {
        let generation = self.target.select(subscription);
        store::lock(&self.store).clear();
        tracing::info!(subscription, generation, "Selected subscription");
    }

    pub fn set_filter(&mut self, filter: MessageFilter) {
        self.filter = filter;
    }

    pub fn set_auto_refresh(&mut self, enabled: bool) {
        match (enabled, self.auto_refresh.is_some()) {
            (true, false) => {
                self.auto_refresh = Some(self.scheduler.spawn_auto_refresh(self.pulls_tx.clone()));
                tracing::info!(
                    interval = ?self.scheduler.policy().auto_refresh,
                    "Auto-refresh enabled"
                );
            }
            (false, true) => {
                self.auto_refresh = None;
                tracing::info!("Auto-refresh disabled");
            }
            _ => {}
        }
    }

    pub fn request_pull(&mut self) {
        let scheduler = self.scheduler.clone();
        self.spawn_op(async move {
            SessionEvent::Pulled(PullReport {
                trigger: PullTrigger::Manual,
                result: scheduler.request_pull().await,
            })
        });
    }

    /// User-initiated acknowledge. A token whose lease already ran out is
    /// refused locally; the message has to be pulled again first.
    pub fn acknowledge(&mut self, ack_id: &str) {
        let now = Utc::now();
        let refused = {
            let store = store::lock(&self.store);
            store
                .find_by_ack_id(ack_id)
                .filter(|m| !self.lease.state_of(m, now).is_eligible())
                .map(|m| m.id.clone())
        };
        if let Some(id) = refused {
            tracing::info!(id = id.as_str(), "Lease expired, repull to acknowledge");
            let _ = self.events_tx.send(SessionEvent::AckRefused { id });
            return;
        }

        let acknowledger = self.acknowledger.clone();
        let ack_id = ack_id.to_string();
        self.spawn_op(async move {
            let result = acknowledger.acknowledge(&ack_id).await;
            SessionEvent::Acked { ack_id, result }
        });
    }

    pub fn list_topics(&mut self) {
        let broker = self.broker.clone();
        self.spawn_op(async move { SessionEvent::Topics(broker.list_topics().await) });
    }

    pub fn list_subscriptions(&mut self, topic: &str) {
        let broker = self.broker.clone();
        let topic = topic.to_string();
        self.spawn_op(async move {
            let result = broker.list_subscriptions(&topic).await;
            SessionEvent::Subscriptions { topic, result }
        });
    }

    pub fn publish(&mut self, topic: &str, payload: &str) {
        let broker = self.broker.clone();
        let topic = topic.to_string();
        let payload = payload.to_string();
        self.spawn_op(async move {
            let result = broker.publish(&topic, &payload).await;
            SessionEvent::Published { topic, result }
        });
    }

    /// Fetch one page of function logs. Without a log source the result is
    /// `LogsError::Disabled`.
    pub fn query_logs(&mut self, query: LogQuery) {
        let Some(logs) = self.logs.clone() else {
            let _ = self.events_tx.send(SessionEvent::Logs(Err(LogsError::Disabled)));
            return;
        };
        self.spawn_op(async move { SessionEvent::Logs(logs.entries(&query).await) });
    }

    pub fn functions(&self) -> Vec<FunctionInfo> {
        self.logs.as_ref().map(|l| l.functions()).unwrap_or_default()
    }

    pub fn is_ack_eligible(&self, id: &str) -> bool {
        self.lease
            .is_ack_eligible(&store::lock(&self.store), id, Utc::now())
    }

    /// Pending messages passing the current filter, newest first.
    pub fn snapshot(&self) -> Vec<MessageView> {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<MessageView> {
        let store = store::lock(&self.store);
        store
            .query(|m| self.filter.matches(m))
            .iter()
            .map(|m| MessageView::new(m, self.lease.state_of(m, now)))
            .collect()
    }

    /// Lease countdowns for the rows `snapshot` would render.
    pub fn lease_snapshot(&self) -> Vec<LeaseView> {
        self.lease_snapshot_at(Utc::now())
    }

    pub fn lease_snapshot_at(&self, now: DateTime<Utc>) -> Vec<LeaseView> {
        let store = store::lock(&self.store);
        store
            .query(|m| self.filter.matches(m))
            .iter()
            .map(|m| {
                let state = self.lease.state_of(m, now);
                LeaseView {
                    id: m.id.clone(),
                    ack_eligible: state.is_eligible(),
                    lease_remaining_secs: state.remaining_secs(),
                }
            })
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        store::lock(&self.store).pending_len()
    }

    /// Next result of a spawned operation, auto-refresh or lease tick.
    /// Cancel safe.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            Some(event) = self.events.recv() => Some(event),
            Some(report) = self.pulls.recv() => Some(SessionEvent::Pulled(report)),
            Some(event) = self.lease_events.recv() => Some(SessionEvent::Lease(event)),
            else => None,
        }
    }

    fn spawn_op<F>(&mut self, op: F)
    where
        F: Future<Output = SessionEvent> + Send + 'static,
    {
        while let Some(result) = self.ops.try_join_next() {
            match result {
                Err(e) if e.is_panic() => tracing::error!("Session operation panicked: {e}"),
                _ => {}
            }
        }
        let events = self.events_tx.clone();
        self.ops.spawn(async move {
            let _ = events.send(op.await);
        });
    }
}
