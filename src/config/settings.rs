use serde::Deserialize;

/// Top-level configuration settings for an embedding host.
///
/// Includes settings for the broker engine and the persistence hook.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub persistence: PersistenceSettings,
}

/// Configuration settings for the broker engine.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Prefetch window applied when a consumer registers without one.
    /// 0 means unlimited outstanding deliveries.
    pub default_prefetch: usize,
    /// Upper bound accepted for a queue's `x-max-priority` argument.
    pub max_priority_ceiling: u8,
}

/// Configuration settings for the sled-backed persistence hook.
#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceSettings {
    pub path: String,
    pub ttl_secs: Option<i64>,
    pub max_messages_per_queue: Option<usize>,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub persistence: Option<PartialPersistenceSettings>,
}

/// Partial broker settings.
///
/// Used for broker configuration from external sources with optional values.
#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub default_prefetch: Option<usize>,
    pub max_priority_ceiling: Option<u8>,
}

/// Partial persistence settings.
#[derive(Debug, Deserialize)]
pub struct PartialPersistenceSettings {
    pub path: Option<String>,
    pub ttl_secs: Option<i64>,
    pub max_messages_per_queue: Option<usize>,
}

/// Provides default values for `Settings`.
///
/// Ensures the engine has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                default_prefetch: 0,
                max_priority_ceiling: 255,
            },
            persistence: PersistenceSettings {
                path: "embermq_db".to_string(),
                ttl_secs: Some(3600),
                max_messages_per_queue: Some(10_000),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Settings::default().broker
    }
}
