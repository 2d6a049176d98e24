//! Event publisher configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::{size::deserialize_size, validation};

/// Publisher configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct PublisherConfig {
    /// Topic every routing event is published to.
    #[validate(custom(function = validation::validate_topic))]
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Largest encoded message accepted for publishing (bytes, or "1MiB").
    #[validate(range(min = 64, max = 104_857_600))]
    #[serde(default = "default_max_message_bytes", deserialize_with = "deserialize_size")]
    pub max_message_bytes: usize,

    /// Throttling applied to recurring failure logs.
    #[validate(nested)]
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

fn default_topic() -> String {
    "bmp.pre-policy".into()
}

fn default_max_message_bytes() -> usize {
    1_000_000
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            max_message_bytes: default_max_message_bytes(),
            throttle: ThrottleConfig::default(),
        }
    }
}

/// Token bucket sizing for failure-log throttling.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ThrottleConfig {
    /// Burst size: number of log lines allowed back to back.
    #[validate(range(min = 1, max = 100_000))]
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens added per second.
    #[validate(range(min = 0.001, max = 100_000.0))]
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
}

fn default_capacity() -> u32 {
    10
}

fn default_refill_per_sec() -> f64 {
    1.0
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill_per_sec(),
        }
    }
}
