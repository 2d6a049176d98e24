//! Custom validation functions for configuration.

use validator::ValidationError;

/// Validate that every bootstrap server is a `host:port` pair.
pub fn validate_brokers(brokers: &[String]) -> Result<(), ValidationError> {
    let valid = brokers.iter().all(|broker| match broker.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0),
        None => false,
    });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_broker_address"))
    }
}

/// Validate a Kafka topic name: 1..=249 chars of `[a-zA-Z0-9._-]`.
pub fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    let valid = !topic.is_empty()
        && topic.len() <= 249
        && topic != "."
        && topic != ".."
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_topic"))
    }
}

/// Validate every topic of a subscription list.
pub fn validate_topics(topics: &[String]) -> Result<(), ValidationError> {
    topics.iter().try_for_each(|t| validate_topic(t))
}

/// Validate log level.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid = ["trace", "debug", "info", "warn", "error"]
        .contains(&level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_addresses() {
        assert!(validate_brokers(&["localhost:9092".into(), "10.0.0.1:19092".into()]).is_ok());
        assert!(validate_brokers(&["localhost".into()]).is_err());
        assert!(validate_brokers(&[":9092".into()]).is_err());
        assert!(validate_brokers(&["kafka:0".into()]).is_err());
    }

    #[test]
    fn topic_names() {
        assert!(validate_topic("bmp.pre-policy").is_ok());
        assert!(validate_topic("bmp_raw").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("..").is_err());
        assert!(validate_topic("bmp raw").is_err());
    }
}
