//! Per-partition claim loop and the auto-commit ticker.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bmpbridge_core::broker::{OffsetStore, PartitionClaim};
use bmpbridge_core::BrokerError;
use bmpbridge_telemetry::MetricsRecorder;

use super::handler::{process_record, MessageHandler};

/// Processes records of one partition in arrival order until the stream
/// closes or `cancel` fires. Returns the number of records processed.
pub(crate) async fn claim_loop<H: MessageHandler + ?Sized>(
    mut claim: PartitionClaim,
    handler: Arc<H>,
    offsets: Arc<dyn OffsetStore>,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
) -> u64 {
    let mut processed = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = claim.records.recv() => match next {
                Some(record) => {
                    process_record(&*handler, &metrics, &record);
                    offsets.mark(&record);
                    processed += 1;
                }
                None => break,
            },
        }
    }
    debug!(
        topic = %claim.topic,
        partition = claim.partition,
        processed,
        "Claim loop finished"
    );
    processed
}

/// Runs [`OffsetStore::commit`] on the blocking pool.
pub(crate) async fn commit_offsets(offsets: &Arc<dyn OffsetStore>) -> Result<(), BrokerError> {
    let offsets = Arc::clone(offsets);
    spawn_blocking(move || offsets.commit()).await?
}

/// Commits marked offsets every `every` until `stop` fires.
pub(crate) fn spawn_committer(
    offsets: Arc<dyn OffsetStore>,
    every: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = commit_offsets(&offsets).await {
                        warn!(error = %e, "Offset commit failed");
                    }
                }
            }
        }
    })
}
