//! Acknowledgment of a single message
//!
//! The store is only finalized after the broker confirmed the acknowledge
//! call, and only if the record still holds the token that was acknowledged.
//! If a redelivery replaced the token while the call was in flight, the
//! record stays pending under the new token. On failure nothing changes and
//! nothing is retried; the error goes back to the caller.

use std::sync::Arc;

use crate::broker::BrokerClient;
use crate::store::{self, MessageId, SharedStore};
use crate::target::Target;
use crate::utils::error::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged { id: MessageId },
    /// No pending record holds this token; nothing was sent.
    NotFound,
    /// The broker accepted the token but a redelivery replaced it meanwhile.
    Superseded { id: MessageId },
    /// The subscription changed while the call was in flight.
    Stale,
}

pub struct Acknowledger {
    broker: Arc<dyn BrokerClient>,
    store: SharedStore,
    target: Arc<Target>,
}

impl Acknowledger {
    pub fn new(broker: Arc<dyn BrokerClient>, store: SharedStore, target: Arc<Target>) -> Self {
        Self {
            broker,
            store,
            target,
        }
    }

    pub async fn acknowledge(&self, ack_id: &str) -> Result<AckOutcome, BrokerError> {
        let Some((subscription, generation)) = self.target.current() else {
            return Ok(AckOutcome::NotFound);
        };
        let id = match store::lock(&self.store).find_by_ack_id(ack_id) {
            Some(message) => message.id.clone(),
            None => {
                tracing::debug!(ack_id, "No pending message holds this ack id");
                return Ok(AckOutcome::NotFound);
            }
        };

        if let Err(e) = self
            .broker
            .acknowledge(&subscription, &[ack_id.to_string()])
            .await
        {
            tracing::warn!(id = id.as_str(), "Acknowledge failed: {e}");
            return Err(e);
        }

        if !self.target.is_current(generation) {
            return Ok(AckOutcome::Stale);
        }

        let mut guard = store::lock(&self.store);
        let holds_token = guard.get(&id).is_some_and(|m| m.ack_id == ack_id);
        if !holds_token {
            tracing::info!(
                id = id.as_str(),
                "Message was redelivered during acknowledge, keeping it pending"
            );
            return Ok(AckOutcome::Superseded { id });
        }
        guard.finalize([id.as_str()]);
        tracing::info!(id = id.as_str(), "Message acknowledged");
        Ok(AckOutcome::Acknowledged { id })
    }
}
