//! Consumer group configuration.
//!
//! Two deployment variants exist:
//! - `all`: reads pre-policy, post-policy and mirroring topics, starting from
//!   the newest record
//! - `mirroring`: reads only the mirroring topic, starting from the oldest
//!   retained record
//!
//! Changing `group_id` discards prior progress and restarts consumption from
//! `initial_offset`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::{size::deserialize_size, validation};

pub const PRE_POLICY_TOPIC: &str = "bmp.pre-policy";
pub const POST_POLICY_TOPIC: &str = "bmp.post-policy";
pub const MIRRORING_TOPIC: &str = "bmp.mirroring";

/// Where a group without committed offsets starts reading.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InitialOffset {
    /// Oldest retained record.
    Oldest,
    /// Only records produced after the group joined.
    Newest,
}

/// Preset topic/group/offset combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerProfile {
    All,
    Mirroring,
}

impl ConsumerProfile {
    /// Overwrites the topic set, group and offset policy with the preset.
    pub fn apply(self, config: &mut ConsumerConfig) {
        match self {
            ConsumerProfile::All => {
                config.group_id = default_group_id();
                config.topics = default_topics();
                config.initial_offset = InitialOffset::Newest;
            }
            ConsumerProfile::Mirroring => {
                config.group_id = "bgp-mirroring-consumer-group".into();
                config.topics = vec![MIRRORING_TOPIC.into()];
                config.initial_offset = InitialOffset::Oldest;
            }
        }
    }
}

/// Consumer configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ConsumerConfig {
    /// Consumer group identity.
    #[validate(length(min = 1, max = 255))]
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Topics to subscribe to.
    #[validate(length(min = 1))]
    #[validate(custom(function = validation::validate_topics))]
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    /// Start position for a group without committed offsets.
    #[serde(default = "default_initial_offset")]
    pub initial_offset: InitialOffset,

    /// Per-partition fetch size cap (bytes, or "100KiB").
    #[validate(range(min = 1024, max = 104_857_600))]
    #[serde(default = "default_fetch_max_bytes", deserialize_with = "deserialize_size")]
    pub fetch_max_bytes: usize,

    /// Interval between offset commits (milliseconds).
    #[validate(range(min = 10, max = 60_000))]
    #[serde(default = "default_auto_commit_interval_ms")]
    pub auto_commit_interval_ms: u64,

    /// Pause before rejoining after a group error (milliseconds).
    #[validate(range(max = 300_000))]
    #[serde(default = "default_rejoin_delay_ms")]
    pub rejoin_delay_ms: u64,

    /// Drain period granted to in-flight work on shutdown (milliseconds).
    #[validate(range(max = 60_000))]
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Records buffered per claimed partition.
    #[validate(range(min = 1, max = 65_536))]
    #[serde(default = "default_claim_buffer")]
    pub claim_buffer: usize,
}

fn default_group_id() -> String {
    "bgp-proto-consumer-group-v2".into()
}

fn default_topics() -> Vec<String> {
    vec![
        PRE_POLICY_TOPIC.into(),
        POST_POLICY_TOPIC.into(),
        MIRRORING_TOPIC.into(),
    ]
}

fn default_initial_offset() -> InitialOffset {
    InitialOffset::Newest
}

fn default_fetch_max_bytes() -> usize {
    1024 * 100
}

fn default_auto_commit_interval_ms() -> u64 {
    1_000
}

fn default_rejoin_delay_ms() -> u64 {
    2_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

fn default_claim_buffer() -> usize {
    256
}

impl ConsumerConfig {
    pub fn auto_commit_interval(&self) -> Duration {
        Duration::from_millis(self.auto_commit_interval_ms)
    }

    pub fn rejoin_delay(&self) -> Duration {
        Duration::from_millis(self.rejoin_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            topics: default_topics(),
            initial_offset: default_initial_offset(),
            fetch_max_bytes: default_fetch_max_bytes(),
            auto_commit_interval_ms: default_auto_commit_interval_ms(),
            rejoin_delay_ms: default_rejoin_delay_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            claim_buffer: default_claim_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirroring_profile_reads_single_topic_from_oldest() {
        let mut config = ConsumerConfig::default();
        ConsumerProfile::Mirroring.apply(&mut config);
        assert_eq!(config.topics, vec![MIRRORING_TOPIC.to_string()]);
        assert_eq!(config.group_id, "bgp-mirroring-consumer-group");
        assert_eq!(config.initial_offset, InitialOffset::Oldest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn all_profile_restores_defaults() {
        let mut config = ConsumerConfig::default();
        ConsumerProfile::Mirroring.apply(&mut config);
        ConsumerProfile::All.apply(&mut config);
        assert_eq!(config.topics.len(), 3);
        assert_eq!(config.initial_offset, InitialOffset::Newest);
        assert_eq!(config.group_id, "bgp-proto-consumer-group-v2");
    }

    #[test]
    fn durations_follow_millisecond_fields() {
        let config = ConsumerConfig::default();
        assert_eq!(config.auto_commit_interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
    }
}
