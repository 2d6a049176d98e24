use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker client error: {0}")]
    Client(String),

    #[error("Timed out after {elapsed:?} while {operation}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("No topics to consume")]
    NoTopics,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Injected failure: {0}")]
    Injected(&'static str),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<JoinError> for BrokerError {
    fn from(err: JoinError) -> Self {
        BrokerError::Task(err.to_string())
    }
}
