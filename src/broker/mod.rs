//! The `broker` module defines how `pullwatch` talks to a message broker.
//!
//! `BrokerClient` is the black-box contract the core relies on: pulls return
//! immediately with zero or more deliveries in no particular order, the same
//! message may be delivered again with a new ack id, and an acknowledge call
//! either accepts every listed token or none of them.
//!
//! Two bindings are provided:
//! - `rest::PubSubRestClient` speaks the Cloud Pub/Sub REST API.
//! - `memory::MemoryBroker` is an in-process at-least-once broker for demos
//!   and tests.

pub mod memory;
pub mod rest;
pub mod topic;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{BrokerKind, BrokerSettings};
use crate::store::{AckId, Delivery};
use crate::utils::error::BrokerError;

pub use memory::MemoryBroker;
pub use rest::PubSubRestClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInfo {
    pub name: String,
    pub short_name: String,
    pub subscription_count: usize,
    pub status: TopicStatus,
}

impl TopicInfo {
    pub fn new(name: impl Into<String>, subscription_count: usize) -> Self {
        let name = name.into();
        Self {
            short_name: short_name(&name).to_string(),
            name,
            subscription_count,
            status: if subscription_count > 0 {
                TopicStatus::Active
            } else {
                TopicStatus::Inactive
            },
        }
    }

    pub fn errored(name: impl Into<String>) -> Self {
        Self {
            status: TopicStatus::Error,
            ..Self::new(name, 0)
        }
    }
}

/// Last path segment of a resource name such as `projects/p/topics/orders`.
pub fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<Delivery>, BrokerError>;

    async fn acknowledge(&self, subscription: &str, ack_ids: &[AckId]) -> Result<(), BrokerError>;

    async fn publish(&self, topic: &str, data: &str) -> Result<String, BrokerError>;

    async fn list_topics(&self) -> Result<Vec<TopicInfo>, BrokerError>;

    async fn list_subscriptions(&self, topic: &str) -> Result<Vec<String>, BrokerError>;
}

/// Build the broker binding selected by configuration.
pub fn from_settings(settings: &BrokerSettings) -> Result<Arc<dyn BrokerClient>, BrokerError> {
    match settings.kind {
        BrokerKind::PubSub => Ok(Arc::new(PubSubRestClient::from_settings(settings)?)),
        BrokerKind::Memory => {
            let broker = MemoryBroker::new(std::time::Duration::from_secs(
                settings.ack_deadline_secs,
            ));
            if let (Some(topic), Some(subscription)) = (&settings.topic, &settings.subscription) {
                broker.create_subscription(topic, subscription);
            }
            Ok(Arc::new(broker))
        }
    }
}
