//! View-layer filtering of pending messages.
//!
//! A `MessageFilter` is a plain predicate handed to `MessageStore::query`.
//! Payloads are parsed best effort; a message whose data is not JSON is
//! matched against its raw text and ordered by its publish time.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Message;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl MessageFilter {
    pub fn is_empty(&self) -> bool {
        self.search().is_none() && self.start.is_none() && self.end.is_none()
    }

    fn search(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, message: &Message) -> bool {
        if self.is_empty() {
            return true;
        }
        let payload = serde_json::from_str::<Value>(&message.data).ok();

        if self.start.is_some() || self.end.is_some() {
            let at = payload
                .as_ref()
                .and_then(created_at)
                .unwrap_or(message.publish_time);
            if self.start.is_some_and(|start| at < start) {
                return false;
            }
            if self.end.is_some_and(|end| at > end) {
                return false;
            }
        }

        match self.search() {
            None => true,
            Some(needle) => match &payload {
                Some(value) => any_string_contains(value, &needle),
                None => message.data.to_lowercase().contains(&needle),
            },
        }
    }
}

/// `order.createdTimeStamp`, as RFC 3339 text or epoch milliseconds.
fn created_at(payload: &Value) -> Option<DateTime<Utc>> {
    match payload.pointer("/order/createdTimeStamp")? {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}

fn any_string_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|v| any_string_contains(v, needle)),
        Value::Object(map) => map.values().any(|v| any_string_contains(v, needle)),
        _ => false,
    }
}
