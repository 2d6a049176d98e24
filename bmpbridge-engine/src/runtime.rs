//! Process-level entry points used by the CLI.

use std::future::Future;
use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use ipnetwork::{IpNetwork, Ipv4Network};
use opentelemetry::KeyValue;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use bmpbridge_config::{BridgeConfig, InitialOffset};
use bmpbridge_core::broker::kafka::{self, KafkaGroup, KafkaSink};
use bmpbridge_core::broker::memory::{MemoryBroker, MemoryGroup};
use bmpbridge_core::broker::{ConsumerGroup, RecordSink};
use bmpbridge_core::events::{
    AsSegment, BmpEventCallback, PathAttributes, PeerSession, PublishOutcome, RouteEvent,
};
use bmpbridge_telemetry::{EventLogger, Liveness, MetricsRecorder};

use crate::dispatcher::{ConsumerDispatcher, LogPresenter, MessageHandler};
use crate::error::EngineError;
use crate::publisher::EventPublisher;
use crate::signals::wait_for_shutdown_signal;

const DEMO_PARTITIONS: i32 = 3;
const DEMO_DEADLINE: Duration = Duration::from_secs(5);

/// Runs `dispatcher` until `shutdown` resolves, then cancels it and waits at
/// most `grace` for the last session to clean up.
pub async fn serve<G, H, F>(
    dispatcher: Arc<ConsumerDispatcher<G, H>>,
    grace: Duration,
    shutdown: F,
) -> Result<(), EngineError>
where
    G: ConsumerGroup + 'static,
    H: MessageHandler + 'static,
    F: Future<Output = std::io::Result<()>>,
{
    let cancel = CancellationToken::new();
    let mut driver = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    let signalled = tokio::select! {
        signalled = shutdown => signalled,
        joined = &mut driver => {
            warn!("Consumer dispatcher exited before shutdown was requested");
            return joined.map_err(EngineError::from);
        }
    };

    info!(grace_ms = grace.as_millis() as u64, "Shutting down");
    EventLogger::log_event(
        "shutdown",
        vec![KeyValue::new("grace_ms", grace.as_millis() as i64)],
    )
    .await;
    cancel.cancel();

    match tokio::time::timeout(grace, &mut driver).await {
        Ok(joined) => joined?,
        Err(_) => {
            warn!("Grace period elapsed before the dispatcher stopped");
            driver.abort();
        }
    }

    signalled.map_err(EngineError::from)
}

/// Consumes the configured topics from Kafka and prints every record until a
/// termination signal arrives. An unreachable cluster at startup is fatal.
#[instrument(skip_all, fields(group = %config.consumer.group_id))]
pub async fn run_consumer(
    config: &BridgeConfig,
    metrics: Arc<MetricsRecorder>,
) -> Result<(), EngineError> {
    kafka::probe(&config.broker)
        .await
        .map_err(EngineError::Startup)?;
    info!(
        brokers = ?config.broker.brokers,
        topics = ?config.consumer.topics,
        initial_offset = ?config.consumer.initial_offset,
        "Starting consumer"
    );

    let group = KafkaGroup::new(&config.broker, &config.consumer);
    let dispatcher = Arc::new(ConsumerDispatcher::new(
        group,
        Arc::new(LogPresenter::stdout()),
        &config.consumer,
        metrics,
    ));
    serve(
        dispatcher,
        config.consumer.shutdown_grace(),
        wait_for_shutdown_signal(),
    )
    .await
}

/// Publishes a single peer up or peer down event to Kafka.
#[instrument(skip_all, fields(topic = %config.publisher.topic, up = up))]
pub async fn run_publish_peer(
    config: &BridgeConfig,
    metrics: Arc<MetricsRecorder>,
    peer: PeerSession,
    up: bool,
    reason: String,
) -> Result<(), EngineError> {
    let sink = KafkaSink::connect(&config.broker)
        .await
        .map_err(EngineError::Startup)?;
    let publisher = EventPublisher::new(sink, &config.publisher, Liveness::new(), metrics);

    // The producer blocks for the whole request.
    let outcome = spawn_blocking(move || {
        if up {
            publisher.on_peer_up(&peer)
        } else {
            publisher.on_peer_down(&peer, &reason)
        }
    })
    .await?;

    match outcome {
        PublishOutcome::Published => Ok(()),
        other => Err(EngineError::Publish(other)),
    }
}

/// Publishes a short scripted session into an in-memory broker and consumes
/// it back through the dispatcher, writing the rendered records to `out`.
#[instrument(skip_all)]
pub async fn run_demo<W>(
    config: &BridgeConfig,
    metrics: Arc<MetricsRecorder>,
    out: W,
) -> Result<W, EngineError>
where
    W: Write + Send + 'static,
{
    let broker = MemoryBroker::new(DEMO_PARTITIONS);

    let mut consumer = config.consumer.clone();
    consumer.initial_offset = InitialOffset::Oldest;
    if !consumer.topics.contains(&config.publisher.topic) {
        consumer.topics.push(config.publisher.topic.clone());
    }

    let publisher = EventPublisher::new(
        broker.clone(),
        &config.publisher,
        Liveness::new(),
        Arc::clone(&metrics),
    );
    let published = publish_demo_session(&publisher)?;
    info!(published, "Demo events published");

    let presenter = Arc::new(LogPresenter::new(out));
    let dispatcher = Arc::new(ConsumerDispatcher::new(
        MemoryGroup::new(broker, &consumer),
        Arc::clone(&presenter),
        &consumer,
        Arc::clone(&metrics),
    ));

    let cancel = CancellationToken::new();
    let driver = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });
    drop(dispatcher);

    let consumed = tokio::time::timeout(DEMO_DEADLINE, async {
        while metrics.records_consumed.get() < published {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    cancel.cancel();
    tokio::time::timeout(config.consumer.shutdown_grace(), driver)
        .await
        .map_err(|_| EngineError::Timeout("demo dispatcher to stop"))??;
    consumed.map_err(|_| EngineError::Timeout("demo records to be consumed"))?;

    Arc::try_unwrap(presenter)
        .map(LogPresenter::into_inner)
        .map_err(|_| EngineError::Task("presenter is still shared".into()))
}

fn publish_demo_session<S: RecordSink>(publisher: &EventPublisher<S>) -> Result<u64, EngineError> {
    let peer = PeerSession::new(
        Ipv4Addr::new(192, 0, 2, 1).into(),
        Ipv4Addr::new(192, 0, 2, 2).into(),
        Ipv4Addr::new(192, 0, 2, 3).into(),
        65001,
        65002,
    );
    let announced = IpNetwork::V4(Ipv4Network::new(Ipv4Addr::new(203, 0, 113, 0), 24)?);
    let withdrawn = IpNetwork::V4(Ipv4Network::new(Ipv4Addr::new(198, 51, 100, 0), 22)?);
    let attributes = PathAttributes {
        next_hop: Some(peer.neighbor),
        local_pref: 100,
        as_path: vec![AsSegment {
            sequence: true,
            asns: vec![65002, 3356, 13335],
        }],
        source: None,
        communities: vec![(65002, 100), (3356, 2)],
    };

    let outcomes = [
        publisher.on_peer_up(&peer),
        publisher.on_route_monitoring(&RouteEvent::announce(peer.clone(), announced, attributes)),
        publisher.on_route_monitoring(&RouteEvent::withdraw(peer.clone(), withdrawn)),
        publisher.on_peer_down(&peer, "demo finished"),
    ];
    Ok(outcomes.iter().filter(|o| o.is_published()).count() as u64)
}
