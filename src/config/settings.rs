use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub lease: LeaseSettings,
    pub pull: PullSettings,
    pub log: LogSettings,
    pub cloud_logging: CloudLoggingSettings,
}

/// Where the dashboard server binds.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    PubSub,
    Memory,
}

/// Which broker to talk to and how.
///
/// `ack_deadline_secs` only applies to the in-memory broker; for Pub/Sub it is
/// a property of the subscription and `lease.window_secs` must match it.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub kind: BrokerKind,
    pub endpoint: String,
    pub project_id: String,
    pub access_token: Option<String>,
    pub max_messages: usize,
    pub ack_deadline_secs: u64,
    pub topic: Option<String>,
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LeaseSettings {
    pub window_secs: u64,
    pub tick_millis: u64,
    pub tombstone_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullSettings {
    pub cooldown_secs: u64,
    pub auto_refresh_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Function log browsing. Uses the broker's `project_id` and `access_token`.
#[derive(Debug, Deserialize, Clone)]
pub struct CloudLoggingSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub page_size: usize,
    /// Functions offered in the dashboard, as `region/name`.
    pub functions: Vec<String>,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub lease: Option<PartialLeaseSettings>,
    pub pull: Option<PartialPullSettings>,
    pub log: Option<PartialLogSettings>,
    pub cloud_logging: Option<PartialCloudLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub kind: Option<BrokerKind>,
    pub endpoint: Option<String>,
    pub project_id: Option<String>,
    pub access_token: Option<String>,
    pub max_messages: Option<usize>,
    pub ack_deadline_secs: Option<u64>,
    pub topic: Option<String>,
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLeaseSettings {
    pub window_secs: Option<u64>,
    pub tick_millis: Option<u64>,
    pub tombstone_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPullSettings {
    pub cooldown_secs: Option<u64>,
    pub auto_refresh_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialCloudLoggingSettings {
    pub enabled: Option<bool>,
    pub endpoint: Option<String>,
    pub page_size: Option<usize>,
    pub functions: Option<Vec<String>>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            kind: BrokerKind::PubSub,
            endpoint: "https://pubsub.googleapis.com".to_string(),
            project_id: String::new(),
            access_token: None,
            max_messages: 10,
            ack_deadline_secs: 10,
            topic: None,
            subscription: None,
        }
    }
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            window_secs: 10,
            tick_millis: 1000,
            tombstone_ttl_secs: 60,
        }
    }
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 10,
            auto_refresh_secs: 5,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for CloudLoggingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://logging.googleapis.com".to_string(),
            page_size: 1000,
            functions: Vec::new(),
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let lease = self.lease.unwrap_or_default();
        let pull = self.pull.unwrap_or_default();
        let log = self.log.unwrap_or_default();
        let cloud_logging = self.cloud_logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
            },
            broker: BrokerSettings {
                kind: broker.kind.unwrap_or(defaults.broker.kind),
                endpoint: broker.endpoint.unwrap_or(defaults.broker.endpoint),
                project_id: broker.project_id.unwrap_or(defaults.broker.project_id),
                access_token: broker.access_token.or(defaults.broker.access_token),
                max_messages: broker.max_messages.unwrap_or(defaults.broker.max_messages),
                ack_deadline_secs: broker
                    .ack_deadline_secs
                    .unwrap_or(defaults.broker.ack_deadline_secs),
                topic: broker.topic.or(defaults.broker.topic),
                subscription: broker.subscription.or(defaults.broker.subscription),
            },
            lease: LeaseSettings {
                window_secs: lease.window_secs.unwrap_or(defaults.lease.window_secs),
                tick_millis: lease.tick_millis.unwrap_or(defaults.lease.tick_millis),
                tombstone_ttl_secs: lease
                    .tombstone_ttl_secs
                    .unwrap_or(defaults.lease.tombstone_ttl_secs),
            },
            pull: PullSettings {
                cooldown_secs: pull.cooldown_secs.unwrap_or(defaults.pull.cooldown_secs),
                auto_refresh_secs: pull
                    .auto_refresh_secs
                    .unwrap_or(defaults.pull.auto_refresh_secs),
            },
            log: LogSettings {
                level: log.level.unwrap_or(defaults.log.level),
            },
            cloud_logging: CloudLoggingSettings {
                enabled: cloud_logging
                    .enabled
                    .unwrap_or(defaults.cloud_logging.enabled),
                endpoint: cloud_logging
                    .endpoint
                    .unwrap_or(defaults.cloud_logging.endpoint),
                page_size: cloud_logging
                    .page_size
                    .unwrap_or(defaults.cloud_logging.page_size),
                functions: cloud_logging
                    .functions
                    .unwrap_or(defaults.cloud_logging.functions),
            },
        }
    }
}
