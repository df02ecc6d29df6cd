use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::TopicInfo;
use crate::filter::MessageFilter;
use crate::logs::{FunctionInfo, LogEntry, LogQuery};
use crate::session::{LeaseView, MessageView};

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "list_topics")]
    ListTopics,
    #[serde(rename = "list_subscriptions")]
    ListSubscriptions { topic: String },
    #[serde(rename = "select_subscription")]
    SelectSubscription { subscription: String },
    #[serde(rename = "pull")]
    Pull,
    #[serde(rename = "ack")]
    Ack { ack_id: String },
    #[serde(rename = "auto_refresh")]
    AutoRefresh { enabled: bool },
    #[serde(rename = "filter")]
    Filter(MessageFilter),
    #[serde(rename = "publish")]
    Publish { topic: String, payload: String },
    #[serde(rename = "logs")]
    Logs(LogQuery),
    #[serde(rename = "list_functions")]
    ListFunctions,
    #[serde(rename = "health")]
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "topics")]
    Topics { topics: Vec<TopicInfo> },
    #[serde(rename = "subscriptions")]
    Subscriptions {
        topic: String,
        subscriptions: Vec<String>,
    },
    /// Filtered pending messages; `pending` counts all of them.
    #[serde(rename = "messages")]
    Messages {
        subscription: Option<String>,
        messages: Vec<MessageView>,
        pending: usize,
        auto_refresh: bool,
    },
    /// Per-tick countdown refresh for the rendered rows.
    #[serde(rename = "leases")]
    Leases { leases: Vec<LeaseView> },
    #[serde(rename = "notice")]
    Notice { level: NoticeLevel, message: String },
    #[serde(rename = "published")]
    Published { topic: String, message_id: String },
    #[serde(rename = "logs")]
    Logs {
        entries: Vec<LogEntry>,
        next_page_token: Option<String>,
    },
    #[serde(rename = "functions")]
    Functions { functions: Vec<FunctionInfo> },
    #[serde(rename = "health")]
    Health {
        status: String,
        timestamp: DateTime<Utc>,
        logs_enabled: bool,
    },
}

impl ServerMessage {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}
