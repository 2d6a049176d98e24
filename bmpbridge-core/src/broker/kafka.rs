//! ## bmpbridge-core::broker::kafka
//! **Kafka adapters for producing and group consumption**
//!
//! Producing and the startup metadata check use the synchronous `kafka`
//! client, so those calls run on `spawn_blocking` threads.
//!
//! Group consumption runs on an `rdkafka` [`StreamConsumer`] that joins the
//! group once and stays subscribed. Its [`GroupContext`] turns rebalance
//! callbacks into sessions: an assignment opens one claim channel per
//! assigned partition, a revocation commits stored offsets and closes every
//! claim, which ends the session. A single pump task routes fetched
//! messages to the claim of their partition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use kafka::client::KafkaClient;
use kafka::producer::{Producer, Record as KafkaRecord, RequiredAcks};
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tokio::sync::{mpsc, oneshot};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use bmpbridge_config::{BrokerConfig, ConsumerConfig, InitialOffset};

use super::{ConsumerGroup, OffsetStore, PartitionClaim, Record, RecordSink, Session};
use crate::error::BrokerError;

/// Upper bound on how long the broker may hold an empty fetch.
const FETCH_MAX_WAIT: Duration = Duration::from_millis(250);

impl From<kafka::Error> for BrokerError {
    fn from(err: kafka::Error) -> Self {
        BrokerError::Client(err.to_string())
    }
}

impl From<KafkaError> for BrokerError {
    fn from(err: KafkaError) -> Self {
        BrokerError::Client(err.to_string())
    }
}

async fn blocking_with_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    work: F,
) -> Result<T, BrokerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BrokerError> + Send + 'static,
{
    match tokio::time::timeout(deadline, spawn_blocking(work)).await {
        Ok(joined) => joined?,
        Err(_) => Err(BrokerError::Timeout {
            operation,
            elapsed: deadline,
        }),
    }
}

/// Loads cluster metadata once. Failure means the brokers are unreachable.
#[instrument(skip_all, fields(brokers = ?config.brokers))]
pub async fn probe(config: &BrokerConfig) -> Result<(), BrokerError> {
    let hosts = config.brokers.clone();
    let client_id = config.client_id.clone();
    blocking_with_deadline("loading cluster metadata", config.dial_timeout(), move || {
        let mut client = KafkaClient::new(hosts);
        client.set_client_id(client_id);
        client.load_metadata_all()?;
        let topics = client.topics().len();
        debug!(topics, "Cluster metadata loaded");
        Ok(())
    })
    .await
}

/// Synchronous producer: one request per record, one required ack.
pub struct KafkaSink {
    producer: Mutex<Producer>,
}

impl KafkaSink {
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let hosts = config.brokers.clone();
        let client_id = config.client_id.clone();
        let ack_timeout = config.write_timeout();
        let producer =
            blocking_with_deadline("creating producer", config.dial_timeout(), move || {
                Ok(Producer::from_hosts(hosts)
                    .with_client_id(client_id)
                    .with_ack_timeout(ack_timeout)
                    .with_required_acks(RequiredAcks::One)
                    .create()?)
            })
            .await?;
        info!(brokers = ?config.brokers, "Producer connected");
        Ok(Self {
            producer: Mutex::new(producer),
        })
    }
}

impl RecordSink for KafkaSink {
    fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.producer
            .lock()
            .send(&KafkaRecord::from_value(topic, payload))?;
        Ok(())
    }
}

type GroupConsumer = StreamConsumer<GroupContext>;
type ClaimSenders = HashMap<(String, i32), mpsc::Sender<Record>>;

/// Rebalance hooks for the group consumer.
///
/// Holds the sending half of every open claim. Each assignment is also
/// queued for the next `join` to pick up.
struct GroupContext {
    claim_buffer: usize,
    routes: Mutex<ClaimSenders>,
    assignments: mpsc::UnboundedSender<Vec<PartitionClaim>>,
    consumer: OnceLock<Weak<GroupConsumer>>,
}

impl GroupContext {
    fn new(claim_buffer: usize) -> (Self, mpsc::UnboundedReceiver<Vec<PartitionClaim>>) {
        let (assignments, rx) = mpsc::unbounded_channel();
        let context = Self {
            claim_buffer: claim_buffer.max(1),
            routes: Mutex::new(HashMap::new()),
            assignments,
            consumer: OnceLock::new(),
        };
        (context, rx)
    }

    fn route(&self, topic: &str, partition: i32) -> Option<mpsc::Sender<Record>> {
        self.routes
            .lock()
            .get(&(topic.to_string(), partition))
            .cloned()
    }

    fn open_claims(&self, assigned: &TopicPartitionList) {
        let mut routes = self.routes.lock();
        routes.clear();

        let mut claims = Vec::with_capacity(assigned.count());
        for element in assigned.elements() {
            let (tx, rx) = mpsc::channel(self.claim_buffer);
            routes.insert((element.topic().to_string(), element.partition()), tx);
            claims.push(PartitionClaim {
                topic: element.topic().to_string(),
                partition: element.partition(),
                records: rx,
            });
        }
        claims.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));

        info!(claims = claims.len(), "Partitions assigned");
        if self.assignments.send(claims).is_err() {
            debug!("Assignment dropped, group is shutting down");
        }
    }

    fn close_claims(&self) {
        if let Some(consumer) = self.consumer.get().and_then(Weak::upgrade) {
            if let Err(e) = consumer.commit_consumer_state(CommitMode::Sync) {
                debug!(error = %e, "Commit before revocation failed");
            }
        }
        let closed = {
            let mut routes = self.routes.lock();
            let closed = routes.len();
            routes.clear();
            closed
        };
        info!(claims = closed, "Partitions revoked");
    }
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        if let Rebalance::Revoke(_) = rebalance {
            self.close_claims();
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Assign(assigned) => self.open_claims(assigned),
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => warn!(error = %e, "Rebalance failed"),
        }
    }
}

fn client_config(broker: &BrokerConfig, consumer: &ConsumerConfig) -> ClientConfig {
    let reset = match consumer.initial_offset {
        InitialOffset::Oldest => "earliest",
        InitialOffset::Newest => "latest",
    };
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", broker.brokers.join(","))
        .set("client.id", &broker.client_id)
        .set("group.id", &consumer.group_id)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false")
        .set("auto.offset.reset", reset)
        .set("max.partition.fetch.bytes", consumer.fetch_max_bytes.to_string())
        .set("fetch.wait.max.ms", FETCH_MAX_WAIT.as_millis().to_string())
        .set(
            "socket.connection.setup.timeout.ms",
            broker.dial_timeout().as_millis().to_string(),
        )
        .set("socket.timeout.ms", broker.read_timeout().as_millis().to_string());
    config
}

/// Subscribed consumer shared by every session of one [`KafkaGroup`].
struct Membership {
    consumer: Arc<GroupConsumer>,
    assignments: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<PartitionClaim>>>,
    stop: CancellationToken,
}

impl Membership {
    fn subscribe(
        broker: &BrokerConfig,
        config: &ConsumerConfig,
        topics: &[String],
    ) -> Result<Self, BrokerError> {
        let (context, assignments) = GroupContext::new(config.claim_buffer);
        let consumer: GroupConsumer =
            client_config(broker, config).create_with_context(context)?;
        let consumer = Arc::new(consumer);
        let _ = consumer.context().consumer.set(Arc::downgrade(&consumer));

        let topic_names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_names)?;
        info!(group = %config.group_id, topics = ?topics, "Subscribed");

        let stop = CancellationToken::new();
        tokio::spawn(pump(Arc::clone(&consumer), stop.clone()));

        Ok(Self {
            consumer,
            assignments: tokio::sync::Mutex::new(assignments),
            stop,
        })
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Polls the consumer and forwards each message to its partition's claim.
/// Polling also drives the rebalance callbacks.
async fn pump(consumer: Arc<GroupConsumer>, stop: CancellationToken) {
    loop {
        let message = tokio::select! {
            _ = stop.cancelled() => break,
            message = consumer.recv() => message,
        };
        let record = match message {
            Ok(message) => Record {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                value: Bytes::copy_from_slice(message.payload().unwrap_or_default()),
            },
            Err(e) => {
                warn!(error = %e, "Fetch failed");
                continue;
            }
        };

        let Some(tx) = consumer.context().route(&record.topic, record.partition) else {
            debug!(
                topic = %record.topic,
                partition = record.partition,
                "Message for unassigned partition"
            );
            continue;
        };
        let (partition, offset) = (record.partition, record.offset);
        if tx.send(record).await.is_err() {
            debug!(partition, offset, "Claim closed before delivery");
        }
    }
    debug!("Fetch pump stopped");
}

struct KafkaOffsets {
    consumer: Arc<GroupConsumer>,
}

impl OffsetStore for KafkaOffsets {
    fn mark(&self, record: &Record) {
        let mut next = TopicPartitionList::new();
        let stored = next
            .add_partition_offset(
                &record.topic,
                record.partition,
                Offset::Offset(record.offset + 1),
            )
            .and_then(|()| self.consumer.store_offsets(&next));
        if let Err(e) = stored {
            debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Offset mark dropped"
            );
        }
    }

    fn commit(&self) -> Result<(), BrokerError> {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Group member backed by one long-lived `rdkafka` consumer.
///
/// The consumer is created and subscribed on the first `join`. Every later
/// `join` waits for the next partition assignment.
pub struct KafkaGroup {
    broker: BrokerConfig,
    consumer: ConsumerConfig,
    generation: AtomicU64,
    membership: Mutex<Option<Arc<Membership>>>,
}

impl KafkaGroup {
    pub fn new(broker: &BrokerConfig, consumer: &ConsumerConfig) -> Self {
        Self {
            broker: broker.clone(),
            consumer: consumer.clone(),
            generation: AtomicU64::new(0),
            membership: Mutex::new(None),
        }
    }

    fn membership(&self, topics: &[String]) -> Result<Arc<Membership>, BrokerError> {
        let mut slot = self.membership.lock();
        if let Some(membership) = slot.as_ref() {
            return Ok(Arc::clone(membership));
        }
        let membership = Arc::new(Membership::subscribe(&self.broker, &self.consumer, topics)?);
        *slot = Some(Arc::clone(&membership));
        Ok(membership)
    }
}

#[async_trait]
impl ConsumerGroup for KafkaGroup {
    #[instrument(skip_all, fields(group = %self.consumer.group_id))]
    async fn join(
        &self,
        topics: &[String],
        cancel: CancellationToken,
    ) -> Result<Session, BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::NoTopics);
        }
        let membership = self.membership(topics)?;

        let claims = {
            let mut assignments = membership.assignments.lock().await;
            let mut latest = None;
            while let Ok(claims) = assignments.try_recv() {
                latest = Some(claims);
            }
            match latest {
                Some(claims) => claims,
                None => {
                    let deadline = self.broker.read_timeout();
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(BrokerError::SessionClosed),
                        next = tokio::time::timeout(deadline, assignments.recv()) => match next {
                            Ok(Some(claims)) => claims,
                            Ok(None) => return Err(BrokerError::SessionClosed),
                            Err(_) => {
                                return Err(BrokerError::Timeout {
                                    operation: "waiting for partition assignment",
                                    elapsed: deadline,
                                })
                            }
                        },
                    }
                }
            }
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = outcome_tx.send(Ok(()));
        });

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation, claims = claims.len(), "Joined group");

        Ok(Session {
            generation,
            claims,
            offsets: Arc::new(KafkaOffsets {
                consumer: Arc::clone(&membership.consumer),
            }),
            outcome: outcome_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;
    use tracing_test::traced_test;

    fn record(topic: &str, partition: i32, offset: i64) -> Record {
        Record {
            topic: topic.into(),
            partition,
            offset,
            value: Bytes::from_static(b"\x0a\x00"),
        }
    }

    #[test]
    fn client_config_follows_consumer_settings() {
        let broker = BrokerConfig {
            brokers: vec!["k1:9092".into(), "k2:9092".into()],
            ..Default::default()
        };
        let consumer = ConsumerConfig {
            group_id: "ops".into(),
            initial_offset: InitialOffset::Oldest,
            ..Default::default()
        };
        let config = client_config(&broker, &consumer);

        assert_eq!(config.get("bootstrap.servers"), Some("k1:9092,k2:9092"));
        assert_eq!(config.get("group.id"), Some("ops"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("fetch.wait.max.ms"), Some("250"));
    }

    #[test]
    fn assignment_opens_one_claim_per_partition() {
        let (context, mut assignments) = GroupContext::new(4);
        let mut assigned = TopicPartitionList::new();
        assigned.add_partition("bmp.pre-policy", 1);
        assigned.add_partition("bmp.pre-policy", 0);
        assigned.add_partition("bmp.mirroring", 0);

        context.post_rebalance(&Rebalance::Assign(&assigned));
        let mut claims = assignments.try_recv().unwrap();

        let keys: Vec<_> = claims
            .iter()
            .map(|c| (c.topic.as_str(), c.partition))
            .collect();
        assert_eq!(
            keys,
            vec![("bmp.mirroring", 0), ("bmp.pre-policy", 0), ("bmp.pre-policy", 1)]
        );

        let tx = context.route("bmp.pre-policy", 1).unwrap();
        tx.try_send(record("bmp.pre-policy", 1, 7)).unwrap();
        assert_eq!(claims[2].records.try_recv().unwrap().offset, 7);
        assert!(context.route("bmp.post-policy", 0).is_none());
    }

    #[test]
    fn revocation_closes_every_claim() {
        let (context, mut assignments) = GroupContext::new(4);
        let mut assigned = TopicPartitionList::new();
        assigned.add_partition("bmp.post-policy", 0);
        assigned.add_partition("bmp.post-policy", 1);

        context.post_rebalance(&Rebalance::Assign(&assigned));
        let mut claims = assignments.try_recv().unwrap();
        context.pre_rebalance(&Rebalance::Revoke(&assigned));

        assert!(context.route("bmp.post-policy", 0).is_none());
        for claim in &mut claims {
            assert!(matches!(
                claim.records.try_recv(),
                Err(TryRecvError::Disconnected)
            ));
        }
    }

    #[test]
    fn reassignment_replaces_previous_claims() {
        let (context, mut assignments) = GroupContext::new(4);
        let mut first = TopicPartitionList::new();
        first.add_partition("bmp.post-policy", 0);
        first.add_partition("bmp.post-policy", 1);
        let mut second = TopicPartitionList::new();
        second.add_partition("bmp.post-policy", 1);

        context.post_rebalance(&Rebalance::Assign(&first));
        let mut old = assignments.try_recv().unwrap();
        context.post_rebalance(&Rebalance::Assign(&second));
        let new = assignments.try_recv().unwrap();

        assert_eq!(new.len(), 1);
        assert!(context.route("bmp.post-policy", 0).is_none());
        assert!(matches!(
            old[0].records.try_recv(),
            Err(TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn mark_on_unassigned_partition_is_logged() {
        let broker = BrokerConfig {
            brokers: vec!["127.0.0.1:1".into()],
            ..Default::default()
        };
        let consumer = ConsumerConfig::default();
        let (context, _assignments) = GroupContext::new(1);
        let group_consumer: GroupConsumer = client_config(&broker, &consumer)
            .create_with_context(context)
            .unwrap();
        let offsets = KafkaOffsets {
            consumer: Arc::new(group_consumer),
        };

        offsets.mark(&record("bmp.post-policy", 3, 41));

        assert!(logs_contain("Offset mark dropped"));
        assert!(logs_contain("offset=41"));
    }

    #[tokio::test]
    async fn join_without_topics_is_rejected() {
        let group = KafkaGroup::new(&BrokerConfig::default(), &ConsumerConfig::default());
        let err = group.join(&[], CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BrokerError::NoTopics));
    }
}
