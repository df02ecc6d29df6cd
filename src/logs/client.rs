//! Cloud Logging REST binding (`v2/entries:list`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{BrokerSettings, CloudLoggingSettings};
use crate::logs::{
    FunctionInfo, LogEntry, LogPage, LogQuery, LogSource, MAX_PAGE_SIZE, build_filter,
};
use crate::utils::error::LogsError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesRequest {
    resource_names: Vec<String>,
    filter: String,
    order_by: String,
    page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ListEntriesResponse {
    entries: Vec<Value>,
    next_page_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloudLoggingClient {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    access_token: Option<String>,
    page_size: usize,
    functions: Vec<FunctionInfo>,
}

impl CloudLoggingClient {
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
            page_size: MAX_PAGE_SIZE,
            functions: Vec::new(),
        }
    }

    /// Default page size, clamped to `1..=MAX_PAGE_SIZE`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Functions listed as `region/name`.
    pub fn with_functions<I, S>(mut self, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.functions = functions
            .into_iter()
            .map(|f| FunctionInfo::parse(f.as_ref()))
            .collect();
        self
    }

    /// Shares the broker's project and credentials.
    pub fn from_settings(
        broker: &BrokerSettings,
        settings: &CloudLoggingSettings,
    ) -> Result<Self, LogsError> {
        if broker.project_id.trim().is_empty() {
            return Err(LogsError::Misconfigured(
                "broker.project_id must be set to browse logs".to_string(),
            ));
        }
        Ok(Self::new(
            settings.endpoint.clone(),
            broker.project_id.clone(),
            broker.access_token.clone(),
        )
        .with_page_size(settings.page_size)
        .with_functions(&settings.functions))
    }
}

#[async_trait]
impl LogSource for CloudLoggingClient {
    async fn entries(&self, query: &LogQuery) -> Result<LogPage, LogsError> {
        let request = ListEntriesRequest {
            resource_names: vec![format!("projects/{}", self.project_id)],
            filter: build_filter(query),
            order_by: format!("timestamp {}", query.order.as_str()),
            page_size: query
                .page_size
                .map_or(self.page_size, |n| n.clamp(1, MAX_PAGE_SIZE)),
            page_token: query.page_token.clone().filter(|t| !t.is_empty()),
        };
        tracing::debug!(filter = request.filter.as_str(), "Listing log entries");

        let mut builder = self
            .http
            .post(format!("{}/v2/entries:list", self.endpoint))
            .json(&request);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LogsError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await?;
        let parsed: ListEntriesResponse = if body.trim().is_empty() {
            ListEntriesResponse::default()
        } else {
            serde_json::from_str(&body).map_err(|e| LogsError::InvalidResponse(e.to_string()))?
        };

        Ok(LogPage {
            entries: parsed.entries.into_iter().map(LogEntry::from_value).collect(),
            next_page_token: parsed.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn functions(&self) -> Vec<FunctionInfo> {
        self.functions.clone()
    }
}
