//! Kafka cluster connection parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Broker connection configuration shared by the publisher and the consumer.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct BrokerConfig {
    /// Bootstrap servers as `host:port`.
    #[validate(length(min = 1))]
    #[validate(custom(function = validation::validate_brokers))]
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,

    /// Client identifier reported to the cluster.
    #[validate(length(min = 1, max = 255))]
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Connection establishment timeout (milliseconds). Bounds the startup probe.
    #[validate(range(min = 100, max = 120_000))]
    #[serde(default = "default_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// Read timeout (milliseconds). Bounds joining the group.
    #[validate(range(min = 100, max = 120_000))]
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Write timeout (milliseconds). Used as the produce acknowledgement timeout.
    #[validate(range(min = 100, max = 120_000))]
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".into()]
}

fn default_client_id() -> String {
    "bmpbridge".into()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl BrokerConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            client_id: default_client_id(),
            dial_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
        }
    }
}
