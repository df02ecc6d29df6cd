//! Function log browsing
//!
//! Next to the message view, the dashboard can page through the Cloud
//! Logging entries written by the functions that consume the subscription.
//! `LogQuery` describes what to fetch, `build_filter` turns it into a Logging
//! filter expression and `LogEntry` is the flattened row the dashboard shows.
//! A `LogSource` fetches pages; `CloudLoggingClient` is the REST binding.

mod client;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Settings;
use crate::utils::error::LogsError;

pub use client::CloudLoggingClient;

/// Largest page the Logging API hands out.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Fields a free-text search is matched against.
const SEARCH_FIELDS: [&str; 9] = [
    "textPayload",
    "jsonPayload.message",
    "jsonPayload.error",
    "jsonPayload.data",
    "insertId",
    "labels.execution_id",
    "trace",
    "resource.labels.function_name",
    "resource.labels.region",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One page request. Every field is optional; an empty query lists the most
/// recent function logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// `region/name`, or a bare function name.
    pub function: Option<String>,
    /// Exact severity; `all` means no restriction.
    pub severity: Option<String>,
    pub search: Option<String>,
    pub page_size: Option<usize>,
    pub order: SortOrder,
    pub page_token: Option<String>,
}

/// Build the Logging filter expression for `query`.
///
/// A search term takes precedence over the function restriction: it is
/// matched as an escaped regex against every field in `SEARCH_FIELDS`.
pub fn build_filter(query: &LogQuery) -> String {
    let mut clauses = vec![r#"resource.type="cloud_function""#.to_string()];
    if let Some(start) = query.start {
        clauses.push(format!(r#"timestamp>="{}""#, timestamp(start)));
    }
    if let Some(end) = query.end {
        clauses.push(format!(r#"timestamp<="{}""#, timestamp(end)));
    }
    if let Some(severity) =
        non_empty(&query.severity).filter(|s| !s.eq_ignore_ascii_case("all"))
    {
        clauses.push(format!(r#"severity="{}""#, severity.to_ascii_uppercase()));
    }

    if let Some(search) = non_empty(&query.search) {
        let pattern = escape_regex(search);
        let alternatives: Vec<String> = SEARCH_FIELDS
            .iter()
            .map(|field| format!(r#"{field}=~"{pattern}""#))
            .collect();
        clauses.push(format!("({})", alternatives.join(" OR ")));
    } else if let Some(function) = non_empty(&query.function) {
        let function = FunctionInfo::parse(function);
        clauses.push(format!(
            r#"resource.labels.function_name="{}""#,
            escape_quotes(&function.name)
        ));
        if !function.region.is_empty() {
            clauses.push(format!(
                r#"resource.labels.region="{}""#,
                escape_quotes(&function.region)
            ));
        }
    }

    clauses.join(" AND ")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn escape_regex(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(
            c,
            '.' | '*' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\' | '"'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A deployed function the dashboard can filter logs by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub name: String,
    pub region: String,
    /// `region/name`, the form `LogQuery::function` accepts.
    pub full_path: String,
}

impl FunctionInfo {
    /// Parse `region/name`. Without a slash the region is left empty.
    pub fn parse(full_path: &str) -> Self {
        let (region, name) = full_path.rsplit_once('/').unwrap_or(("", full_path));
        Self {
            name: name.to_string(),
            region: region.to_string(),
            full_path: full_path.to_string(),
        }
    }
}

/// A log entry flattened for display.
///
/// `message` is the text payload, or the JSON payload serialized, or empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: Option<String>,
    pub severity: Option<String>,
    pub log_name: Option<String>,
    pub insert_id: Option<String>,
    pub trace: Option<String>,
    pub span_id: Option<String>,
    pub receive_timestamp: Option<String>,
    pub labels: Map<String, Value>,
    pub resource: Value,
    pub http_request: Option<Value>,
    pub operation: Option<Value>,
    pub source_location: Option<Value>,
    pub text_payload: Option<String>,
    pub json_payload: Option<Value>,
    pub message: String,
    pub function_name: String,
    pub region: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawEntry {
    timestamp: Option<String>,
    severity: Option<String>,
    log_name: Option<String>,
    insert_id: Option<String>,
    trace: Option<String>,
    span_id: Option<String>,
    receive_timestamp: Option<String>,
    labels: Map<String, Value>,
    resource: Option<Value>,
    http_request: Option<Value>,
    operation: Option<Value>,
    source_location: Option<Value>,
    text_payload: Option<String>,
    json_payload: Option<Value>,
}

impl LogEntry {
    /// Flatten one raw entry. Entries that do not have the expected shape
    /// become an `ERROR` placeholder row instead of failing the page.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<RawEntry>(value) {
            Ok(raw) => Self::from_raw(raw),
            Err(e) => {
                tracing::warn!("Malformed log entry: {e}");
                Self::placeholder(Utc::now())
            }
        }
    }

    fn from_raw(raw: RawEntry) -> Self {
        let resource = raw.resource.unwrap_or_else(|| Value::Object(Map::new()));
        let resource_label = |key: &str| {
            resource
                .pointer(&format!("/labels/{key}"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let function_name = resource_label("function_name");
        let region = resource_label("region");

        let message = match (&raw.text_payload, &raw.json_payload) {
            (Some(text), _) if !text.is_empty() => text.clone(),
            (_, Some(json)) => json.to_string(),
            _ => String::new(),
        };

        Self {
            timestamp: raw.timestamp,
            severity: raw.severity,
            log_name: raw.log_name,
            insert_id: raw.insert_id,
            trace: raw.trace,
            span_id: raw.span_id,
            receive_timestamp: raw.receive_timestamp,
            labels: raw.labels,
            resource,
            http_request: raw.http_request,
            operation: raw.operation,
            source_location: raw.source_location,
            text_payload: raw.text_payload,
            json_payload: raw.json_payload,
            message,
            function_name,
            region,
        }
    }

    fn placeholder(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp(now)),
            severity: Some("ERROR".to_string()),
            message: "Error processing log entry".to_string(),
            function_name: "Unknown".to_string(),
            region: "Unknown".to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    /// Pass back as `LogQuery::page_token` for the next page.
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait LogSource: Send + Sync {
    async fn entries(&self, query: &LogQuery) -> Result<LogPage, LogsError>;

    /// Functions offered as filter choices.
    fn functions(&self) -> Vec<FunctionInfo>;
}

/// The configured log source, or `None` when log browsing is disabled.
pub fn from_settings(settings: &Settings) -> Result<Option<Arc<dyn LogSource>>, LogsError> {
    if !settings.cloud_logging.enabled {
        return Ok(None);
    }
    let client = CloudLoggingClient::from_settings(&settings.broker, &settings.cloud_logging)?;
    Ok(Some(Arc::new(client)))
}
