//! ## bmpbridge-core::broker
//! **Seam between the bridge and the message bus**
//!
//! Producers see a [`RecordSink`]: one synchronous attempt per record.
//! Consumers join a [`ConsumerGroup`] and receive a [`Session`] holding one
//! [`PartitionClaim`] per assigned partition plus the [`OffsetStore`] used to
//! acknowledge processed records.
//!
//! ### Session lifecycle
//! - A session ends when the group closes every claim stream (partitions
//!   revoked by a rebalance) or when the token passed to `join` is cancelled.
//! - `outcome` resolves once the broker side has shut down, after every
//!   handle to the session's [`OffsetStore`] is dropped.
//! - Marked offsets become durable only on [`OffsetStore::commit`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;

pub mod kafka;
pub mod memory;

/// One record read from a partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub value: Bytes,
}

/// Destination for encoded messages.
pub trait RecordSink: Send + Sync {
    /// Single attempt, no retry. Blocks the caller for the duration.
    fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

impl<S: RecordSink + ?Sized> RecordSink for Arc<S> {
    fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        (**self).send(topic, payload)
    }
}

/// Offset acknowledgement for one session.
pub trait OffsetStore: Send + Sync {
    /// Records `record` as processed. Not durable until the next commit.
    fn mark(&self, record: &Record);

    /// Makes every mark so far durable for the group. May block on the
    /// network, so async callers run it on the blocking pool.
    fn commit(&self) -> Result<(), BrokerError>;
}

/// Ordered record stream for one assigned partition.
#[derive(Debug)]
pub struct PartitionClaim {
    pub topic: String,
    pub partition: i32,
    pub records: mpsc::Receiver<Record>,
}

pub struct Session {
    /// Increases by one per successful join.
    pub generation: u64,
    pub claims: Vec<PartitionClaim>,
    pub offsets: Arc<dyn OffsetStore>,
    pub outcome: oneshot::Receiver<Result<(), BrokerError>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .field("claims", &self.claims.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Joins the group for `topics` and waits for a partition assignment.
    async fn join(
        &self,
        topics: &[String],
        cancel: CancellationToken,
    ) -> Result<Session, BrokerError>;
}

#[async_trait]
impl<G: ConsumerGroup + ?Sized> ConsumerGroup for Arc<G> {
    async fn join(
        &self,
        topics: &[String],
        cancel: CancellationToken,
    ) -> Result<Session, BrokerError> {
        (**self).join(topics, cancel).await
    }
}
