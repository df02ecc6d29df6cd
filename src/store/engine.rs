//! Message store engine
//!
//! `MessageStore` is the only owner of message identity and lifecycle. It is
//! mutated by `reconcile` (pulled batches) and `finalize` (confirmed acks) and
//! read through `query`.
//!
//! Concurrency and usage notes:
//! - The API is synchronous and designed to be held behind a lock
//!   (`SharedStore`). Callers must not hold the lock across broker I/O.
//! - Pull and acknowledge responses may arrive in any order. The rules in
//!   `admit` make every interleaving converge: an acknowledged id never goes
//!   back to pending, and the most recently delivered ack id always wins.
//! - Acknowledged records stay as tombstones so a late duplicate delivery
//!   cannot resurrect them; `prune_tombstones` evicts old ones.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::store::message::{Delivery, Message, MessageId, MessageStatus};

/// How a single delivery was resolved against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First observation of this id.
    Inserted,
    /// Id already acknowledged; the delivery was ignored.
    Ignored,
    /// Same ack id seen again; only `pulled_at` moved.
    Refreshed,
    /// Broker redelivered with a new ack id; the old one is now invalid.
    Redelivered,
}

/// Per-rule counts for one reconciled batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub refreshed: usize,
    pub redelivered: usize,
    pub ignored: usize,
}

impl ReconcileSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.refreshed + self.redelivered + self.ignored
    }

    fn record(&mut self, admission: Admission) {
        match admission {
            Admission::Inserted => self.inserted += 1,
            Admission::Ignored => self.ignored += 1,
            Admission::Refreshed => self.refreshed += 1,
            Admission::Redelivered => self.redelivered += 1,
        }
    }
}

type OrderKey = (Reverse<DateTime<Utc>>, MessageId);

/// Local view of a subscription: pending records plus acknowledged
/// tombstones, keyed by message id.
#[derive(Debug, Default)]
pub struct MessageStore {
    records: HashMap<MessageId, Message>,
    /// Pending ids, newest `publish_time` first.
    order: BTreeSet<OrderKey>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a pulled batch into the store, stamping admissions with the
    /// current wall-clock time.
    pub fn reconcile<I>(&mut self, batch: I) -> ReconcileSummary
    where
        I: IntoIterator<Item = Delivery>,
    {
        self.reconcile_at(batch, Utc::now())
    }

    /// Same as `reconcile`, with `now` as the admission time.
    ///
    /// Per delivery: an unknown id is inserted; a pending id with the same
    /// ack id gets its `pulled_at` refreshed; a pending id with a new ack id
    /// is a redelivery, taking the new token and a fresh `pulled_at`; an
    /// acknowledged id is ignored.
    pub fn reconcile_at<I>(&mut self, batch: I, now: DateTime<Utc>) -> ReconcileSummary
    where
        I: IntoIterator<Item = Delivery>,
    {
        let mut summary = ReconcileSummary::default();
        for delivery in batch {
            summary.record(self.admit(delivery, now));
        }
        summary
    }

    fn admit(&mut self, delivery: Delivery, now: DateTime<Utc>) -> Admission {
        let Some(existing) = self.records.get_mut(&delivery.id) else {
            let message = Message::admit(delivery, now);
            self.order
                .insert((Reverse(message.publish_time), message.id.clone()));
            self.records.insert(message.id.clone(), message);
            return Admission::Inserted;
        };

        if existing.status == MessageStatus::Acknowledged {
            return Admission::Ignored;
        }

        existing.touch(now);
        if existing.ack_id == delivery.ack_id {
            Admission::Refreshed
        } else {
            tracing::debug!(
                id = existing.id.as_str(),
                previous = existing.ack_id.as_str(),
                current = delivery.ack_id.as_str(),
                "Message redelivered with a new ack id"
            );
            existing.ack_id = delivery.ack_id;
            existing.delivery_count += 1;
            Admission::Redelivered
        }
    }

    /// Mark ids as acknowledged. Only call after the broker confirmed the
    /// acknowledgment. Unknown and already acknowledged ids are ignored.
    /// Returns how many records transitioned.
    pub fn finalize<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.finalize_at(ids, Utc::now())
    }

    pub fn finalize_at<I, S>(&mut self, ids: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut finalized = 0;
        for id in ids {
            let Some(message) = self.records.get_mut(id.as_ref()) else {
                continue;
            };
            if message.status != MessageStatus::PendingAck {
                continue;
            }
            message.status = MessageStatus::Acknowledged;
            message.acknowledged_at = Some(now);
            self.order
                .remove(&(Reverse(message.publish_time), message.id.clone()));
            finalized += 1;
        }
        finalized
    }

    /// Pending records matching `predicate`, newest `publish_time` first.
    ///
    /// The returned `Query` does no work until iterated and can be iterated
    /// any number of times.
    pub fn query<P>(&self, predicate: P) -> Query<'_, P>
    where
        P: Fn(&Message) -> bool,
    {
        Query {
            store: self,
            predicate,
        }
    }

    /// Record by id, tombstones included.
    pub fn get(&self, id: &str) -> Option<&Message> {
        self.records.get(id)
    }

    /// Resolve a lease token to the pending record currently holding it.
    ///
    /// Linear scan; the live working set is small.
    pub fn find_by_ack_id(&self, ack_id: &str) -> Option<&Message> {
        self.records
            .values()
            .find(|m| m.is_pending() && m.ack_id == ack_id)
    }

    /// Pending records in no particular order. Use `query` for display order.
    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.records.values().filter(|m| m.is_pending())
    }

    pub fn pending_len(&self) -> usize {
        self.order.len()
    }

    /// All records, tombstones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget everything, used when the session switches subscription.
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
    }

    /// Drop tombstones acknowledged before `cutoff`. Pending records are
    /// never touched. Returns how many were evicted.
    pub fn prune_tombstones(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, m| match m.acknowledged_at {
            Some(at) => at >= cutoff,
            None => true,
        });
        before - self.records.len()
    }
}

pub struct Query<'a, P> {
    store: &'a MessageStore,
    predicate: P,
}

impl<'a, P> Query<'a, P>
where
    P: Fn(&Message) -> bool,
{
    pub fn iter(&self) -> impl Iterator<Item = &'a Message> + '_ {
        let store = self.store;
        store
            .order
            .iter()
            .filter_map(move |(_, id)| store.records.get(id))
            .filter(move |m| m.is_pending() && (self.predicate)(*m))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.iter().cloned().collect()
    }
}

impl<'q, 'a, P> IntoIterator for &'q Query<'a, P>
where
    P: Fn(&Message) -> bool,
{
    type Item = &'a Message;
    type IntoIter = Box<dyn Iterator<Item = &'a Message> + 'q>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
