//! Lease eligibility
//!
//! The broker accepts an acknowledgment only while the delivery's lease is
//! alive. `LeaseTimer` answers "may this message be acknowledged now?" from
//! the record's `pulled_at` and the wall clock. Eligibility is always derived
//! on demand; `pulled_at` can move between ticks when a pull lands.
//!
//! The periodic task spawned by `LeaseTimer::spawn` re-evaluates every
//! pending record each tick and reports the result to its listener. It also
//! evicts old tombstones.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc::UnboundedSender;

use crate::store::{self, Message, MessageId, MessageStore, SharedStore};
use crate::utils::task::TaskHandle;

/// Must match the broker's ack deadline for the subscription.
pub const LEASE_WINDOW: Duration = Duration::from_secs(10);

pub const TICK: Duration = Duration::from_secs(1);

/// Pub/Sub caps ack deadlines at 600s; anything past a day is a typo.
pub const MAX_LEASE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Tombstones outlive at least this many lease windows.
pub const TOMBSTONE_WINDOWS: u32 = 6;

/// Shortest tombstone lifetime that still covers late redeliveries for
/// `window`.
pub fn min_tombstone_ttl(window: Duration) -> Duration {
    window.min(MAX_LEASE_WINDOW) * TOMBSTONE_WINDOWS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Eligible { remaining: TimeDelta },
    /// Lease ran out; only a fresh pull can renew it.
    Expired,
    Acknowledged,
}

impl LeaseState {
    pub fn is_eligible(&self) -> bool {
        matches!(self, LeaseState::Eligible { .. })
    }

    /// Whole seconds left on the lease, zero unless eligible.
    pub fn remaining_secs(&self) -> i64 {
        match self {
            LeaseState::Eligible { remaining } => remaining.num_seconds(),
            _ => 0,
        }
    }
}

/// Result of one tick: eligibility flips plus how many records are still
/// pending. A tick with pending records but no flips only moves countdowns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseEvent {
    pub expired: Vec<MessageId>,
    pub renewed: Vec<MessageId>,
    pub pending: usize,
}

impl LeaseEvent {
    pub fn has_flips(&self) -> bool {
        !self.expired.is_empty() || !self.renewed.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LeaseTimer {
    window: TimeDelta,
}

impl Default for LeaseTimer {
    fn default() -> Self {
        Self::new(LEASE_WINDOW)
    }
}

impl LeaseTimer {
    /// Windows longer than `MAX_LEASE_WINDOW` are clamped.
    pub fn new(window: Duration) -> Self {
        Self {
            window: TimeDelta::from_std(window.min(MAX_LEASE_WINDOW))
                .unwrap_or_else(|_| TimeDelta::days(1)),
        }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn state_of(&self, message: &Message, now: DateTime<Utc>) -> LeaseState {
        if !message.is_pending() {
            return LeaseState::Acknowledged;
        }
        // A clock stepping backwards counts as "just pulled".
        let elapsed = (now - message.pulled_at).max(TimeDelta::zero());
        if elapsed <= self.window {
            LeaseState::Eligible {
                remaining: self.window - elapsed,
            }
        } else {
            LeaseState::Expired
        }
    }

    /// `false` for unknown or acknowledged ids.
    pub fn is_ack_eligible(&self, store: &MessageStore, id: &str, now: DateTime<Utc>) -> bool {
        store
            .get(id)
            .is_some_and(|m| self.state_of(m, now).is_eligible())
    }

    /// Eligibility of every pending record at `now`.
    pub fn evaluate(&self, store: &MessageStore, now: DateTime<Utc>) -> HashMap<MessageId, bool> {
        store
            .pending()
            .map(|m| (m.id.clone(), self.state_of(m, now).is_eligible()))
            .collect()
    }

    /// Start the periodic re-evaluation. Every tick that saw flips or still
    /// has pending records sends a `LeaseEvent`; the task ends when the
    /// handle is dropped or the receiver goes away. `tombstone_ttl` is raised
    /// to `min_tombstone_ttl` of the window.
    pub fn spawn(
        self,
        store: SharedStore,
        tick: Duration,
        tombstone_ttl: Duration,
        events: UnboundedSender<LeaseEvent>,
    ) -> TaskHandle {
        let floor = min_tombstone_ttl(self.window.to_std().unwrap_or(LEASE_WINDOW));
        let ttl = TimeDelta::from_std(tombstone_ttl.max(floor)).unwrap_or(TimeDelta::MAX);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last: HashMap<MessageId, bool> = HashMap::new();

            loop {
                interval.tick().await;
                let now = Utc::now();
                let current = {
                    let mut store = store::lock(&store);
                    if let Some(cutoff) = now.checked_sub_signed(ttl) {
                        let pruned = store.prune_tombstones(cutoff);
                        if pruned > 0 {
                            tracing::debug!(pruned, "Evicted acknowledged tombstones");
                        }
                    }
                    self.evaluate(&store, now)
                };

                let event = diff(&last, &current);
                last = current;
                if !event.has_flips() && event.pending == 0 {
                    continue;
                }
                if events.send(event).is_err() {
                    break;
                }
            }
        });
        TaskHandle::new("lease-timer", handle)
    }
}

fn diff(last: &HashMap<MessageId, bool>, current: &HashMap<MessageId, bool>) -> LeaseEvent {
    let mut event = LeaseEvent {
        pending: current.len(),
        ..LeaseEvent::default()
    };
    for (id, &eligible) in current {
        match (last.get(id).copied(), eligible) {
            (Some(true), false) | (None, false) => event.expired.push(id.clone()),
            (Some(false), true) => event.renewed.push(id.clone()),
            _ => {}
        }
    }
    event.expired.sort();
    event.renewed.sort();
    event
}

#[cfg(test)]
mod tests;
