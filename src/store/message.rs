//! Message definitions for the store
//!
//! `Delivery` is one item of a pulled batch as handed over by a broker
//! binding. `Message` is the locally tracked record for a message id.
//!
//! Notes on fields:
//! - `id`: broker-assigned message id, stable across redeliveries
//! - `ack_id`: lease token for the current delivery attempt; replaced on redelivery
//! - `publish_time`: set by the broker, never changed locally; used for ordering
//! - `pulled_at`: local wall-clock time of the latest admission; drives the lease
//! - `data`: decoded payload, opaque to the store

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MessageId = String;
pub type AckId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: MessageId,
    pub data: String,
    pub ack_id: AckId,
    pub publish_time: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
    PendingAck,
    Acknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub data: String,
    pub ack_id: AckId,
    pub publish_time: DateTime<Utc>,
    pub pulled_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub attributes: BTreeMap<String, String>,
    /// Number of distinct ack ids this id has been admitted with.
    pub delivery_count: u32,
    #[serde(skip)]
    pub(crate) acknowledged_at: Option<DateTime<Utc>>,
}

impl Message {
    pub(crate) fn admit(delivery: Delivery, now: DateTime<Utc>) -> Self {
        Self {
            id: delivery.id,
            data: delivery.data,
            ack_id: delivery.ack_id,
            publish_time: delivery.publish_time,
            pulled_at: now,
            status: MessageStatus::PendingAck,
            attributes: delivery.attributes,
            delivery_count: 1,
            acknowledged_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::PendingAck
    }

    /// When the record became a tombstone, if it is one.
    pub fn acknowledged_at(&self) -> Option<DateTime<Utc>> {
        self.acknowledged_at
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.pulled_at {
            self.pulled_at = now;
        }
    }
}
