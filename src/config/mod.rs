mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, PersistenceSettings, Settings};


/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the broker and persistence configurations
pub fn load_config() -> Result<Settings, ConfigError> {
    // Double-underscore separator so snake_case field names survive the
    // split: BROKER__DEFAULT_PREFETCH addresses broker.default_prefetch.
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("__"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        broker: BrokerSettings {
            default_prefetch: partial
                .broker
                .as_ref()
                .and_then(|b| b.default_prefetch)
                .unwrap_or(default.broker.default_prefetch),
            max_priority_ceiling: partial
                .broker
                .as_ref()
                .and_then(|b| b.max_priority_ceiling)
                .unwrap_or(default.broker.max_priority_ceiling),
        },
        persistence: PersistenceSettings {
            path: partial
                .persistence
                .as_ref()
                .and_then(|p| p.path.clone())
                .unwrap_or(default.persistence.path),
            ttl_secs: partial
                .persistence
                .as_ref()
                .and_then(|p| p.ttl_secs)
                .or(default.persistence.ttl_secs),
            max_messages_per_queue: partial
                .persistence
                .as_ref()
                .and_then(|p| p.max_messages_per_queue)
                .or(default.persistence.max_messages_per_queue),
        },
    })
}
