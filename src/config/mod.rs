mod settings;

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};

use crate::lease::min_tombstone_ttl;
use crate::scheduler::PullPolicy;
use crate::session::SessionSettings;
use settings::PartialSettings;

pub use settings::{
    BrokerKind, BrokerSettings, CloudLoggingSettings, LeaseSettings, LogSettings, PullSettings,
    ServerSettings, Settings,
};

/// Loads the configuration from `config/default` and `PULLWATCH__*`
/// environment variables, merged over default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("PULLWATCH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge(Settings::default()))
}

impl Settings {
    /// Timing and sizing for one dashboard session. The tombstone ttl never
    /// drops below six lease windows.
    pub fn session(&self) -> SessionSettings {
        let lease_window = Duration::from_secs(self.lease.window_secs);
        SessionSettings {
            lease_window,
            lease_tick: Duration::from_millis(self.lease.tick_millis.max(1)),
            tombstone_ttl: Duration::from_secs(self.lease.tombstone_ttl_secs)
                .max(min_tombstone_ttl(lease_window)),
            pull: PullPolicy {
                cooldown: Duration::from_secs(self.pull.cooldown_secs),
                auto_refresh: Duration::from_secs(self.pull.auto_refresh_secs.max(1)),
                max_messages: self.broker.max_messages.max(1),
            },
            subscription: self.broker.subscription.clone(),
        }
    }
}
