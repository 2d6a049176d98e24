use thiserror::Error;
use tokio::task::JoinError;

use bmpbridge_core::{BrokerError, PublishOutcome};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Broker unreachable at startup: {0}")]
    Startup(#[source] BrokerError),

    #[error("Event was not published: {0:?}")]
    Publish(PublishOutcome),

    #[error("Invalid prefix: {0}")]
    Prefix(#[from] ipnetwork::IpNetworkError),

    #[error("Signal handling failed: {0}")]
    Signal(#[from] std::io::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}
