//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Notify;

use crate::broker::{BrokerClient, TopicInfo};
use crate::logs::{FunctionInfo, LogEntry, LogPage, LogQuery, LogSource};
use crate::store::{AckId, Delivery};
use crate::utils::error::{BrokerError, LogsError};

pub fn delivery(id: &str, ack_id: &str, publish_secs: i64) -> Delivery {
    Delivery {
        id: id.to_string(),
        data: format!("{{\"order\":{{\"id\":\"{id}\"}}}}"),
        ack_id: ack_id.to_string(),
        publish_time: Utc.timestamp_opt(1_740_830_400 + publish_secs, 0).unwrap(),
        attributes: Default::default(),
    }
}

/// Broker that replays queued responses. An empty pull queue yields an empty
/// batch; an empty ack queue accepts. When gated, calls wait for `release`.
#[derive(Default)]
pub struct ScriptedBroker {
    pulls: Mutex<VecDeque<Result<Vec<Delivery>, BrokerError>>>,
    acks: Mutex<VecDeque<Result<(), BrokerError>>>,
    pub acknowledged: Mutex<Vec<(String, Vec<AckId>)>>,
    pub pull_calls: Mutex<usize>,
    gate: Option<Notify>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::default()
        }
    }

    pub fn push_pull(&self, result: Result<Vec<Delivery>, BrokerError>) {
        self.pulls.lock().unwrap().push_back(result);
    }

    pub fn push_ack(&self, result: Result<(), BrokerError>) {
        self.acks.lock().unwrap().push_back(result);
    }

    /// Let one gated call through.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn pull_count(&self) -> usize {
        *self.pull_calls.lock().unwrap()
    }

    async fn wait(&self) {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    async fn pull(&self, _subscription: &str, _max: usize) -> Result<Vec<Delivery>, BrokerError> {
        *self.pull_calls.lock().unwrap() += 1;
        self.wait().await;
        self.pulls.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[AckId]) -> Result<(), BrokerError> {
        self.wait().await;
        let result = self.acks.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.acknowledged
                .lock()
                .unwrap()
                .push((subscription.to_string(), ack_ids.to_vec()));
        }
        result
    }

    async fn publish(&self, _topic: &str, _data: &str) -> Result<String, BrokerError> {
        Ok("published-1".to_string())
    }

    async fn list_topics(&self) -> Result<Vec<TopicInfo>, BrokerError> {
        Ok(vec![TopicInfo::new("projects/test/topics/orders", 1)])
    }

    async fn list_subscriptions(&self, _topic: &str) -> Result<Vec<String>, BrokerError> {
        Ok(vec!["orders-sub".to_string()])
    }
}

/// Log source returning one fixed page and recording every query.
#[derive(Default)]
pub struct StaticLogs {
    pub entries: Vec<LogEntry>,
    pub functions: Vec<FunctionInfo>,
    pub queries: Mutex<Vec<LogQuery>>,
}

#[async_trait]
impl LogSource for StaticLogs {
    async fn entries(&self, query: &LogQuery) -> Result<LogPage, LogsError> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(LogPage {
            entries: self.entries.clone(),
            next_page_token: None,
        })
    }

    fn functions(&self) -> Vec<FunctionInfo> {
        self.functions.clone()
    }
}
