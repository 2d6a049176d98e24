//! ## bmpbridge-core::broker::memory
//! **In-process broker with partitioned logs and group offsets**
//!
//! Records are appended round-robin across a fixed number of partitions per
//! topic. A [`MemoryGroup`] hands every partition of its topics to the single
//! live session; joining again or calling [`MemoryGroup::rebalance`] ends the
//! previous session. Committed offsets survive across sessions, so a rejoin
//! resumes after the last commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bmpbridge_config::{ConsumerConfig, InitialOffset};

use super::{ConsumerGroup, OffsetStore, PartitionClaim, Record, RecordSink, Session};
use crate::error::BrokerError;

type PartitionKey = (String, i32);

#[derive(Debug, Default)]
struct Logs {
    partitions: HashMap<PartitionKey, Vec<Bytes>>,
    next_partition: HashMap<String, i32>,
    /// (group, topic, partition) -> next offset to read
    committed: HashMap<(String, String, i32), i64>,
}

#[derive(Debug)]
struct Inner {
    partitions: i32,
    logs: Mutex<Logs>,
    appended: watch::Sender<u64>,
    failing_sends: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

/// Consumes one pending injected failure, if any.
fn take_failure(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryBroker {
    /// Creates a broker with `partitions` partitions per topic (at least one).
    pub fn new(partitions: i32) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                logs: Mutex::new(Logs::default()),
                appended,
                failing_sends: AtomicUsize::new(0),
            }),
        }
    }

    pub fn partitions(&self) -> i32 {
        self.inner.partitions
    }

    /// The next `count` sends fail without appending.
    pub fn fail_next_sends(&self, count: usize) {
        self.inner.failing_sends.store(count, Ordering::Release);
    }

    /// Every record of `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<Bytes> {
        let logs = self.inner.logs.lock();
        (0..self.inner.partitions)
            .filter_map(|p| logs.partitions.get(&(topic.to_string(), p)))
            .flat_map(|log| log.iter().cloned())
            .collect()
    }

    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.inner
            .logs
            .lock()
            .committed
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied()
    }

    fn start_offset(
        &self,
        group_id: &str,
        key: &PartitionKey,
        initial_offset: InitialOffset,
    ) -> i64 {
        let logs = self.inner.logs.lock();
        if let Some(offset) = logs
            .committed
            .get(&(group_id.to_string(), key.0.clone(), key.1))
        {
            return *offset;
        }
        match initial_offset {
            InitialOffset::Oldest => 0,
            InitialOffset::Newest => logs.partitions.get(key).map_or(0, |l| l.len() as i64),
        }
    }

    fn read_from(&self, key: &PartitionKey, position: i64) -> Vec<Bytes> {
        let logs = self.inner.logs.lock();
        logs.partitions
            .get(key)
            .and_then(|log| log.get(position.max(0) as usize..))
            .map(<[Bytes]>::to_vec)
            .unwrap_or_default()
    }
}

impl RecordSink for MemoryBroker {
    fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if take_failure(&self.inner.failing_sends) {
            return Err(BrokerError::Injected("send"));
        }
        {
            let mut logs = self.inner.logs.lock();
            let next = logs.next_partition.entry(topic.to_string()).or_insert(0);
            let partition = *next;
            *next = (partition + 1) % self.inner.partitions;
            logs.partitions
                .entry((topic.to_string(), partition))
                .or_default()
                .push(Bytes::copy_from_slice(payload));
        }
        self.inner.appended.send_modify(|n| *n += 1);
        Ok(())
    }
}

/// A consumer group over a [`MemoryBroker`] with one member.
#[derive(Debug)]
pub struct MemoryGroup {
    broker: MemoryBroker,
    group_id: String,
    initial_offset: InitialOffset,
    claim_buffer: usize,
    generation: AtomicU64,
    live: Mutex<Option<CancellationToken>>,
    failing_joins: AtomicUsize,
}

impl MemoryGroup {
    pub fn new(broker: MemoryBroker, config: &ConsumerConfig) -> Self {
        Self {
            broker,
            group_id: config.group_id.clone(),
            initial_offset: config.initial_offset,
            claim_buffer: config.claim_buffer.max(1),
            generation: AtomicU64::new(0),
            live: Mutex::new(None),
            failing_joins: AtomicUsize::new(0),
        }
    }

    /// Ends the live session, if any. Its claim streams close.
    pub fn rebalance(&self) {
        if let Some(stop) = self.live.lock().take() {
            info!(group = %self.group_id, "Forcing rebalance");
            stop.cancel();
        }
    }

    /// The next `count` joins fail.
    pub fn fail_next_joins(&self, count: usize) {
        self.failing_joins.store(count, Ordering::Release);
    }

    /// Number of successful joins so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ConsumerGroup for MemoryGroup {
    async fn join(
        &self,
        topics: &[String],
        cancel: CancellationToken,
    ) -> Result<Session, BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::NoTopics);
        }
        if take_failure(&self.failing_joins) {
            return Err(BrokerError::Injected("join"));
        }

        let stop = cancel.child_token();
        if let Some(previous) = self.live.lock().replace(stop.clone()) {
            previous.cancel();
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let mut claims = Vec::new();
        let mut pumps = Vec::new();
        for topic in topics {
            for partition in 0..self.broker.partitions() {
                let key = (topic.clone(), partition);
                let start = self
                    .broker
                    .start_offset(&self.group_id, &key, self.initial_offset);
                let (tx, rx) = mpsc::channel(self.claim_buffer);
                pumps.push(tokio::spawn(pump(
                    self.broker.clone(),
                    key,
                    start,
                    tx,
                    stop.clone(),
                )));
                claims.push(PartitionClaim {
                    topic: topic.clone(),
                    partition,
                    records: rx,
                });
            }
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(async move {
            stop.cancelled().await;
            for handle in pumps {
                let _ = handle.await;
            }
            let _ = outcome_tx.send(Ok(()));
        });

        info!(
            group = %self.group_id,
            generation,
            claims = claims.len(),
            "Joined group"
        );

        Ok(Session {
            generation,
            claims,
            offsets: Arc::new(MemoryOffsets {
                broker: self.broker.clone(),
                group_id: self.group_id.clone(),
                marked: Mutex::new(HashMap::new()),
            }),
            outcome: outcome_rx,
        })
    }
}

/// Feeds one claim from its partition log until the session stops.
async fn pump(
    broker: MemoryBroker,
    key: PartitionKey,
    mut position: i64,
    tx: mpsc::Sender<Record>,
    stop: CancellationToken,
) {
    let mut appended = broker.inner.appended.subscribe();
    loop {
        let batch = broker.read_from(&key, position);
        if batch.is_empty() {
            tokio::select! {
                _ = stop.cancelled() => return,
                changed = appended.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            continue;
        }

        for value in batch {
            let record = Record {
                topic: key.0.clone(),
                partition: key.1,
                offset: position,
                value,
            };
            tokio::select! {
                _ = stop.cancelled() => return,
                sent = tx.send(record) => {
                    if sent.is_err() {
                        debug!(topic = %key.0, partition = key.1, "Claim dropped");
                        return;
                    }
                }
            }
            position += 1;
        }
    }
}

#[derive(Debug)]
struct MemoryOffsets {
    broker: MemoryBroker,
    group_id: String,
    marked: Mutex<HashMap<PartitionKey, i64>>,
}

impl OffsetStore for MemoryOffsets {
    fn mark(&self, record: &Record) {
        let next = record.offset + 1;
        let mut marked = self.marked.lock();
        let entry = marked
            .entry((record.topic.clone(), record.partition))
            .or_insert(next);
        *entry = (*entry).max(next);
    }

    fn commit(&self) -> Result<(), BrokerError> {
        let marked = self.marked.lock().clone();
        let mut logs = self.broker.inner.logs.lock();
        for ((topic, partition), offset) in marked {
            logs.committed
                .insert((self.group_id.clone(), topic, partition), offset);
        }
        Ok(())
    }
}
