//! Pull scheduling
//!
//! `PullScheduler` decides when the broker may be pulled and feeds results
//! into the store. There are two triggers, a manual request and a fixed
//! auto-refresh interval, and both go through one shared `Throttle`:
//! - a pull is refused while another pull is in flight
//! - once any pull completes, successfully or not, a cooldown starts and every
//!   request until it ends is refused (not queued, not retried)
//!
//! A failed pull leaves the store untouched. A pull that completes after the
//! session switched subscription is discarded.

mod throttle;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, MissedTickBehavior};

use crate::broker::BrokerClient;
use crate::store::{self, ReconcileSummary, SharedStore};
use crate::target::Target;
use crate::utils::error::BrokerError;
use crate::utils::task::TaskHandle;

pub use throttle::Throttle;

pub const PULL_COOLDOWN: Duration = Duration::from_secs(10);
pub const AUTO_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_MESSAGES: usize = 10;

/// Pull pacing. `cooldown` applies after every finished pull, whatever
/// triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullPolicy {
    pub cooldown: Duration,
    pub auto_refresh: Duration,
    pub max_messages: usize,
}

impl Default for PullPolicy {
    fn default() -> Self {
        Self {
            cooldown: PULL_COOLDOWN,
            auto_refresh: AUTO_REFRESH_INTERVAL,
            max_messages: MAX_MESSAGES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullTrigger {
    Manual,
    AutoRefresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The batch was reconciled into the store.
    Completed {
        received: usize,
        summary: ReconcileSummary,
    },
    /// Refused by the throttle; `retry_in` is zero while a pull is in flight.
    Throttled { retry_in: Duration },
    /// The subscription changed while the pull was in flight.
    Stale,
    NoSubscription,
}

/// One finished pull attempt, as reported by the auto-refresh task.
#[derive(Debug)]
pub struct PullReport {
    pub trigger: PullTrigger,
    pub result: Result<PullOutcome, BrokerError>,
}

/// Releases the throttle when the pull finishes or its future is dropped.
struct PullSlot<'a> {
    throttle: &'a Mutex<Throttle>,
}

impl Drop for PullSlot<'_> {
    fn drop(&mut self) {
        self.throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(Instant::now());
    }
}

pub struct PullScheduler {
    broker: Arc<dyn BrokerClient>,
    store: SharedStore,
    target: Arc<Target>,
    policy: PullPolicy,
    throttle: Mutex<Throttle>,
}

impl PullScheduler {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: SharedStore,
        target: Arc<Target>,
        policy: PullPolicy,
    ) -> Self {
        Self {
            broker,
            store,
            target,
            policy,
            throttle: Mutex::new(Throttle::new(policy.cooldown)),
        }
    }

    pub fn policy(&self) -> PullPolicy {
        self.policy
    }

    fn throttle(&self) -> MutexGuard<'_, Throttle> {
        self.throttle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time left before the throttle admits another pull.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.throttle().remaining(Instant::now())
    }

    /// User-initiated pull.
    pub async fn request_pull(&self) -> Result<PullOutcome, BrokerError> {
        self.pull(PullTrigger::Manual).await
    }

    /// Run one pull through the shared throttle.
    ///
    /// Returns `Throttled` without calling the broker while another pull is
    /// in flight or the cooldown is running. A successful batch is reconciled
    /// unless the subscription changed meanwhile (`Stale`). A broker error
    /// leaves the store untouched. Either way the cooldown starts once the
    /// call returns.
    pub async fn pull(&self, trigger: PullTrigger) -> Result<PullOutcome, BrokerError> {
        let Some((subscription, generation)) = self.target.current() else {
            return Ok(PullOutcome::NoSubscription);
        };

        let begun = self.throttle().try_begin(Instant::now());
        if let Err(retry_in) = begun {
            tracing::debug!(?trigger, ?retry_in, "Pull refused by cooldown");
            return Ok(PullOutcome::Throttled { retry_in });
        }

        let slot = PullSlot {
            throttle: &self.throttle,
        };
        let result = self
            .broker
            .pull(&subscription, self.policy.max_messages)
            .await;
        drop(slot);

        let batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(?trigger, subscription = subscription.as_str(), "Pull failed: {e}");
                return Err(e);
            }
        };

        if !self.target.is_current(generation) {
            tracing::debug!(
                subscription = subscription.as_str(),
                discarded = batch.len(),
                "Dropping pull response for a previous subscription"
            );
            return Ok(PullOutcome::Stale);
        }

        let received = batch.len();
        let summary = store::lock(&self.store).reconcile(batch);
        if received > 0 {
            tracing::info!(
                ?trigger,
                subscription = subscription.as_str(),
                received,
                inserted = summary.inserted,
                redelivered = summary.redelivered,
                ignored = summary.ignored,
                "Pulled messages"
            );
        }
        Ok(PullOutcome::Completed { received, summary })
    }

    /// Pull every `policy.auto_refresh`, starting one interval from now.
    /// Each attempt, throttled ones included, is reported to `reports`.
    pub fn spawn_auto_refresh(self: &Arc<Self>, reports: UnboundedSender<PullReport>) -> TaskHandle {
        let scheduler = Arc::clone(self);
        let period = self.policy.auto_refresh;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let result = scheduler.pull(PullTrigger::AutoRefresh).await;
                let report = PullReport {
                    trigger: PullTrigger::AutoRefresh,
                    result,
                };
                if reports.send(report).is_err() {
                    break;
                }
            }
        });
        TaskHandle::new("auto-refresh", handle)
    }
}

#[cfg(test)]
mod tests;
