//! In-process broker
//!
//! `MemoryBroker` behaves like a pull subscription with at-least-once
//! delivery:
//! - publishing to a topic copies the message into every attached subscription
//! - each pull hands out a fresh ack id and starts an ack deadline
//! - a delivery whose deadline passed goes back to the backlog and is handed
//!   out again, under a new ack id, on a later pull
//! - an acknowledge call fails as a whole if any token is unknown or expired
//!
//! All state sits behind one mutex and no lock is held across an await.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::broker::topic::Topic;
use crate::broker::{BrokerClient, TopicInfo};
use crate::store::{AckId, Delivery};
use crate::utils::error::BrokerError;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    data: String,
    publish_time: DateTime<Utc>,
    attributes: BTreeMap<String, String>,
}

#[derive(Debug)]
struct Outstanding {
    message: StoredMessage,
    deadline: DateTime<Utc>,
}

#[derive(Debug)]
struct SubscriptionQueue {
    topic: String,
    backlog: VecDeque<StoredMessage>,
    outstanding: HashMap<AckId, Outstanding>,
}

impl SubscriptionQueue {
    fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            backlog: VecDeque::new(),
            outstanding: HashMap::new(),
        }
    }

    /// Move deliveries whose deadline passed back to the head of the backlog,
    /// oldest first.
    fn expire(&mut self, now: DateTime<Utc>) {
        let expired: Vec<AckId> = self
            .outstanding
            .iter()
            .filter(|(_, o)| o.deadline < now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        let mut returning: Vec<StoredMessage> = expired
            .iter()
            .filter_map(|ack_id| self.outstanding.remove(ack_id))
            .map(|o| o.message)
            .collect();
        returning.sort_by(|a, b| b.publish_time.cmp(&a.publish_time));
        for message in returning {
            self.backlog.push_front(message);
        }
    }
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    subscriptions: HashMap<String, SubscriptionQueue>,
}

#[derive(Debug)]
pub struct MemoryBroker {
    state: Mutex<State>,
    ack_deadline: TimeDelta,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(crate::lease::LEASE_WINDOW)
    }
}

impl MemoryBroker {
    pub fn new(ack_deadline: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ack_deadline: TimeDelta::from_std(ack_deadline).unwrap_or(TimeDelta::MAX),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_topic(&self, name: &str) {
        self.state()
            .topics
            .entry(name.to_string())
            .or_insert_with(|| Topic::new(name));
    }

    /// Attach a subscription to a topic, creating the topic if needed.
    pub fn create_subscription(&self, topic: &str, subscription: &str) {
        let mut state = self.state();
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .attach(subscription);
        state
            .subscriptions
            .entry(subscription.to_string())
            .or_insert_with(|| SubscriptionQueue::new(topic));
    }

    pub fn delete_subscription(&self, subscription: &str) {
        let mut state = self.state();
        if let Some(queue) = state.subscriptions.remove(subscription) {
            if let Some(topic) = state.topics.get_mut(&queue.topic) {
                topic.detach(subscription);
            }
        }
    }

    pub fn publish_at(
        &self,
        topic: &str,
        data: &str,
        attributes: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> String {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            data: data.to_string(),
            publish_time: now,
            attributes,
        };

        let mut state = self.state();
        let State {
            topics,
            subscriptions,
        } = &mut *state;
        let topic = topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic));
        for name in &topic.subscriptions {
            if let Some(queue) = subscriptions.get_mut(name) {
                queue.backlog.push_back(message.clone());
            }
        }
        tracing::debug!(
            topic = topic.name.as_str(),
            id = message.id.as_str(),
            fanout = topic.subscriptions.len(),
            "Published message"
        );
        message.id
    }

    pub fn pull_at(
        &self,
        subscription: &str,
        max_messages: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let mut state = self.state();
        let queue = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| BrokerError::UnknownSubscription(subscription.to_string()))?;
        queue.expire(now);

        let take = max_messages.min(queue.backlog.len());
        let mut batch = Vec::with_capacity(take);
        for message in queue.backlog.drain(..take).collect::<Vec<_>>() {
            let ack_id = Uuid::new_v4().to_string();
            batch.push(Delivery {
                id: message.id.clone(),
                data: message.data.clone(),
                ack_id: ack_id.clone(),
                publish_time: message.publish_time,
                attributes: message.attributes.clone(),
            });
            queue.outstanding.insert(
                ack_id,
                Outstanding {
                    message,
                    deadline: now
                        .checked_add_signed(self.ack_deadline)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                },
            );
        }
        Ok(batch)
    }

    pub fn acknowledge_at(
        &self,
        subscription: &str,
        ack_ids: &[AckId],
        now: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state();
        let queue = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| BrokerError::UnknownSubscription(subscription.to_string()))?;

        for ack_id in ack_ids {
            match queue.outstanding.get(ack_id) {
                Some(o) if o.deadline >= now => {}
                Some(_) => {
                    return Err(BrokerError::AckRejected(format!(
                        "ack id {ack_id} has expired"
                    )));
                }
                None => {
                    return Err(BrokerError::AckRejected(format!(
                        "ack id {ack_id} is not outstanding"
                    )));
                }
            }
        }
        for ack_id in ack_ids {
            queue.outstanding.remove(ack_id);
        }
        Ok(())
    }

    pub fn backlog_len(&self, subscription: &str) -> usize {
        self.state()
            .subscriptions
            .get(subscription)
            .map_or(0, |q| q.backlog.len())
    }

    pub fn outstanding_len(&self, subscription: &str) -> usize {
        self.state()
            .subscriptions
            .get(subscription)
            .map_or(0, |q| q.outstanding.len())
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<Delivery>, BrokerError> {
        self.pull_at(subscription, max_messages, Utc::now())
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[AckId]) -> Result<(), BrokerError> {
        self.acknowledge_at(subscription, ack_ids, Utc::now())
    }

    async fn publish(&self, topic: &str, data: &str) -> Result<String, BrokerError> {
        Ok(self.publish_at(topic, data, BTreeMap::new(), Utc::now()))
    }

    async fn list_topics(&self) -> Result<Vec<TopicInfo>, BrokerError> {
        let state = self.state();
        let mut topics: Vec<TopicInfo> = state
            .topics
            .values()
            .map(|t| TopicInfo::new(t.name.clone(), t.subscriptions.len()))
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    async fn list_subscriptions(&self, topic: &str) -> Result<Vec<String>, BrokerError> {
        self.state()
            .topics
            .get(topic)
            .map(|t| t.subscriptions.iter().cloned().collect())
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))
    }
}
