//! # bmpbridge configuration
//!
//! Hierarchical configuration for the BMP bridge: the publisher that pushes
//! routing events into Kafka and the consumer that reads them back.
//!
//! ## Sections
//! - `broker`: bootstrap servers and network timeouts
//! - `publisher`: target topic, message size cap, failure-log throttling
//! - `consumer`: group identity, topics, offset policy, commit cadence
//! - `telemetry`: log level

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod broker;
mod consumer;
mod error;
mod publisher;
mod size;
mod telemetry;
mod validation;

pub use broker::BrokerConfig;
pub use consumer::{
    ConsumerConfig, ConsumerProfile, InitialOffset, MIRRORING_TOPIC, POST_POLICY_TOPIC,
    PRE_POLICY_TOPIC,
};
pub use error::ConfigError;
pub use publisher::{PublisherConfig, ThrottleConfig};
pub use telemetry::TelemetryConfig;

const ENV_PREFIX: &str = "BMPBRIDGE_";

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct BridgeConfig {
    /// Kafka cluster connection parameters.
    #[validate(nested)]
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Event publisher parameters.
    #[validate(nested)]
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Consumer group parameters.
    #[validate(nested)]
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Logging parameters.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl BridgeConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/bmpbridge.yaml`, if present
    /// 3. `config/<BMPBRIDGE_ENV>.yaml`, if present
    /// 4. `BMPBRIDGE_*` environment variables (`__` separates nested keys)
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(BridgeConfig::default()));

        if Path::new("config/bmpbridge.yaml").exists() {
            figment = figment.merge(Yaml::file("config/bmpbridge.yaml"));
        }

        let env = std::env::var("BMPBRIDGE_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment)
    }

    /// Load configuration from a specific file layered over the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment =
            Figment::from(Serialized::defaults(BridgeConfig::default())).merge(Yaml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn full_config_validation() {
        let config = BridgeConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn environment_override() {
        std::env::set_var("BMPBRIDGE_CONSUMER__CLAIM_BUFFER", "512");
        let config = BridgeConfig::load().unwrap();
        std::env::remove_var("BMPBRIDGE_CONSUMER__CLAIM_BUFFER");
        assert_eq!(config.consumer.claim_buffer, 512);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = BridgeConfig::load_from_path("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn yaml_file_layers_over_defaults() {
        let path = std::env::temp_dir().join(format!("bmpbridge-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "consumer:\n  group_id: replay-2\n  initial_offset: oldest\n  fetch_max_bytes: 200KiB\npublisher:\n  topic: bmp.post-policy"
        )
        .unwrap();

        let config = BridgeConfig::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.consumer.group_id, "replay-2");
        assert_eq!(config.consumer.initial_offset, InitialOffset::Oldest);
        assert_eq!(config.consumer.fetch_max_bytes, 200 * 1024);
        assert_eq!(config.publisher.topic, "bmp.post-policy");
        assert_eq!(config.broker.brokers, vec!["localhost:9092".to_string()]);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = BridgeConfig::default();
        config.consumer.topics.clear();
        config.broker.brokers = vec!["no-port".into()];
        let err = config.validate().unwrap_err();
        let rendered = ConfigError::from(err).to_string();
        assert!(rendered.contains("topics"));
        assert!(rendered.contains("brokers"));
    }
}
