//! # bmpbridge-engine
//!
//! The two halves of the bridge: [`EventPublisher`] turns routing events into
//! wire messages on the bus, and [`ConsumerDispatcher`] reads them back
//! through a consumer group. `runtime` wires both to Kafka for the CLI.

pub mod dispatcher;
mod error;
pub mod publisher;
pub mod runtime;
pub mod signals;

pub use dispatcher::{process_record, ConsumerDispatcher, Dispatch, LogPresenter, MessageHandler};
pub use error::EngineError;
pub use publisher::EventPublisher;

// Re-export the runtime functions so frontends can simply do:
pub use runtime::{run_consumer, run_demo, run_publish_peer, serve};
