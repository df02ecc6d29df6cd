//! Cloud Pub/Sub REST binding
//!
//! Talks to the `v1` REST surface (`subscriptions.pull`,
//! `subscriptions.acknowledge`, `topics.publish`, `topics.list`,
//! `topics.subscriptions.list`). Pulls always use `returnImmediately` so the
//! dashboard never blocks on an empty subscription.
//!
//! Message data arrives base64 encoded. It is decoded to text here; a
//! message whose data does not decode is kept with its raw text so one bad
//! payload never fails the batch.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::broker::{BrokerClient, TopicInfo, short_name};
use crate::config::BrokerSettings;
use crate::store::{AckId, Delivery};
use crate::utils::error::BrokerError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
    return_immediately: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    message_id: String,
    publish_time: DateTime<Utc>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [AckId],
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<OutgoingMessage>,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListTopicsResponse {
    #[serde(default)]
    topics: Vec<TopicResource>,
}

#[derive(Debug, Deserialize)]
struct TopicResource {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListTopicSubscriptionsResponse {
    #[serde(default)]
    subscriptions: Vec<String>,
}

impl From<ReceivedMessage> for Delivery {
    fn from(received: ReceivedMessage) -> Self {
        let message = received.message;
        let data = match STANDARD.decode(message.data.as_bytes()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::warn!(
                    id = message.message_id.as_str(),
                    "Message data is not valid base64, keeping raw text: {e}"
                );
                message.data
            }
        };
        Delivery {
            id: message.message_id,
            data,
            ack_id: received.ack_id,
            publish_time: message.publish_time,
            attributes: message.attributes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PubSubRestClient {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    access_token: Option<String>,
}

impl PubSubRestClient {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            access_token,
        }
    }

    pub fn from_settings(settings: &BrokerSettings) -> Result<Self, BrokerError> {
        if settings.project_id.trim().is_empty() {
            return Err(BrokerError::Misconfigured(
                "broker.project_id must be set for the pubsub broker".to_string(),
            ));
        }
        Ok(Self::new(
            settings.endpoint.clone(),
            settings.project_id.clone(),
            settings.access_token.clone(),
        ))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/projects/{}/{}", self.endpoint, self.project_id, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned + Default>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BrokerError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&body).map_err(|e| BrokerError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl BrokerClient for PubSubRestClient {
    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let url = self.url(&format!("subscriptions/{subscription}:pull"));
        tracing::debug!(subscription, max_messages, "Pulling messages");
        let response: PullResponse = self
            .send(self.http.post(url).json(&PullRequest {
                max_messages,
                return_immediately: true,
            }))
            .await?;
        Ok(response
            .received_messages
            .into_iter()
            .map(Delivery::from)
            .collect())
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[AckId]) -> Result<(), BrokerError> {
        let url = self.url(&format!("subscriptions/{subscription}:acknowledge"));
        let _: serde_json::Value = self
            .send(self.http.post(url).json(&AcknowledgeRequest { ack_ids }))
            .await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, data: &str) -> Result<String, BrokerError> {
        let url = self.url(&format!("topics/{topic}:publish"));
        let request = PublishRequest {
            messages: vec![OutgoingMessage {
                data: STANDARD.encode(data.as_bytes()),
            }],
        };
        let response: Option<PublishResponse> =
            self.send(self.http.post(url).json(&request)).await?;
        response
            .and_then(|r| r.message_ids.into_iter().next())
            .ok_or_else(|| BrokerError::InvalidResponse("publish returned no message id".into()))
    }

    async fn list_topics(&self) -> Result<Vec<TopicInfo>, BrokerError> {
        let response: ListTopicsResponse = self.send(self.http.get(self.url("topics"))).await?;

        let lookups = response.topics.into_iter().map(|topic| async move {
            match self.list_subscriptions(short_name(&topic.name)).await {
                Ok(subscriptions) => TopicInfo::new(topic.name, subscriptions.len()),
                Err(e) => {
                    tracing::warn!(topic = topic.name.as_str(), "Failed to inspect topic: {e}");
                    TopicInfo::errored(topic.name)
                }
            }
        });
        Ok(join_all(lookups).await)
    }

    async fn list_subscriptions(&self, topic: &str) -> Result<Vec<String>, BrokerError> {
        let url = self.url(&format!("topics/{topic}/subscriptions"));
        let response: ListTopicSubscriptionsResponse = self.send(self.http.get(url)).await?;
        Ok(response
            .subscriptions
            .iter()
            .map(|s| short_name(s).to_string())
            .collect())
    }
}
