//! The `error` module defines the error types used within `pullwatch`.
//!
//! `BrokerError` is what every broker binding returns; the core surfaces it to
//! the caller unchanged and never applies a partial result on failure.
//! `LogsError` covers function log browsing. `Error` is the top-level type
//! used by the binary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("broker returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("acknowledgment rejected: {0}")]
    AckRejected(String),

    #[error("invalid broker response: {0}")]
    InvalidResponse(String),

    #[error("broker misconfigured: {0}")]
    Misconfigured(String),
}

#[derive(Debug, Error)]
pub enum LogsError {
    #[error("log request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("logging api returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid logging response: {0}")]
    InvalidResponse(String),

    #[error("log browsing is not enabled")]
    Disabled,

    #[error("log browsing misconfigured: {0}")]
    Misconfigured(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Logs(#[from] LogsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
