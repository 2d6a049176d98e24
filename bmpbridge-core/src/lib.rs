//! # bmpbridge-core
//!
//! Routing event types and the message bus seam shared by the publisher and
//! the consumer dispatcher.
//!
//! ### Key Submodules:
//! - `events`: peer and route events plus the [`BmpEventCallback`] trait
//! - `broker`: producer sink, consumer group sessions and offset stores,
//!   with an in-memory broker and a Kafka adapter

pub mod broker;
pub mod error;
pub mod events;

pub use error::BrokerError;
pub use events::{BmpEventCallback, PublishOutcome};
