//! # bmpbridge telemetry
//!
//! Logging, prometheus counters, failure-log throttling and the liveness flag
//! shared between the publisher and whatever health check reads it.

pub mod liveness;
pub mod logging;
pub mod metrics;
pub mod throttle;

pub use liveness::Liveness;
pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
pub use throttle::TokenBucket;
