//! ## bmpbridge-engine::dispatcher
//! **Consumer group driver**
//!
//! [`ConsumerDispatcher::run`] walks the [`GroupState`] machine until the
//! cancellation token fires:
//! - `Joining`: join the group; on error log, wait `rejoin_delay`, try again
//! - `Setup`: publish a fresh ready epoch
//! - `Claiming`: one task per claimed partition plus the auto-commit ticker
//! - `Cleanup`: stop the ticker, final commit, close the session
//!
//! Records are acknowledged after processing and committed on the next tick,
//! so a crash replays whatever was processed since the last commit.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use bmpbridge_config::ConsumerConfig;
use bmpbridge_core::broker::{ConsumerGroup, OffsetStore, PartitionClaim, Session};
use bmpbridge_core::BrokerError;
use bmpbridge_telemetry::{EventLogger, MetricsRecorder};

mod claim;
pub mod handler;
pub mod state;

pub use handler::{process_record, Dispatch, LogPresenter, MessageHandler};
pub use state::{transition, GroupEvent, GroupState};

use claim::{claim_loop, commit_offsets, spawn_committer};

/// Session state carried from `Joining` through `Cleanup`.
struct ActiveSession {
    generation: u64,
    claims: Vec<PartitionClaim>,
    offsets: Arc<dyn OffsetStore>,
    outcome: oneshot::Receiver<Result<(), BrokerError>>,
    cancel: CancellationToken,
}

impl ActiveSession {
    fn new(session: Session, cancel: CancellationToken) -> Self {
        Self {
            generation: session.generation,
            claims: session.claims,
            offsets: session.offsets,
            outcome: session.outcome,
            cancel,
        }
    }
}

pub struct ConsumerDispatcher<G, H> {
    group: G,
    handler: Arc<H>,
    metrics: Arc<MetricsRecorder>,
    group_id: String,
    topics: Vec<String>,
    auto_commit_interval: Duration,
    rejoin_delay: Duration,
    ready: watch::Sender<u64>,
    state: watch::Sender<GroupState>,
}

impl<G, H> ConsumerDispatcher<G, H>
where
    G: ConsumerGroup,
    H: MessageHandler + 'static,
{
    pub fn new(
        group: G,
        handler: Arc<H>,
        config: &ConsumerConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let (ready, _) = watch::channel(0);
        let (state, _) = watch::channel(GroupState::Joining);
        Self {
            group,
            handler,
            metrics,
            group_id: config.group_id.clone(),
            topics: config.topics.clone(),
            auto_commit_interval: config.auto_commit_interval(),
            rejoin_delay: config.rejoin_delay(),
            ready,
            state,
        }
    }

    /// Ready epochs: bumped once per partition assignment, starting at 1.
    pub fn ready_signal(&self) -> watch::Receiver<u64> {
        self.ready.subscribe()
    }

    pub fn state_signal(&self) -> watch::Receiver<GroupState> {
        self.state.subscribe()
    }

    /// Drives the group lifecycle until `cancel` fires and the last session
    /// is cleaned up.
    #[instrument(skip_all, fields(group = %self.group_id))]
    pub async fn run(&self, cancel: CancellationToken) {
        let mut state = GroupState::Joining;
        let mut active: Option<ActiveSession> = None;

        while state != GroupState::Stopped {
            let event = match state {
                GroupState::Joining => self.join(&cancel, &mut active).await,
                GroupState::Setup => self.setup(&cancel, active.as_ref()).await,
                GroupState::Claiming => match active.as_mut() {
                    Some(session) => self.claim(&cancel, session).await,
                    None => GroupEvent::SessionEnded,
                },
                GroupState::Cleanup => self.cleanup(&cancel, active.take()).await,
                GroupState::Stopped => break,
            };

            let next = transition(state, event);
            debug!(from = ?state, ?event, to = ?next, "Group transition");
            state = next;
            self.state.send_replace(state);
        }

        info!("Consumer dispatcher stopped");
    }

    async fn join(
        &self,
        cancel: &CancellationToken,
        active: &mut Option<ActiveSession>,
    ) -> GroupEvent {
        if cancel.is_cancelled() {
            return GroupEvent::Cancelled;
        }

        let session_cancel = cancel.child_token();
        let joined = tokio::select! {
            _ = cancel.cancelled() => return GroupEvent::Cancelled,
            joined = self.group.join(&self.topics, session_cancel.clone()) => joined,
        };

        match joined {
            Ok(session) => {
                *active = Some(ActiveSession::new(session, session_cancel));
                GroupEvent::Assigned
            }
            Err(e) => {
                error!(error = %e, "Failed to join consumer group");
                self.pause(cancel).await;
                GroupEvent::JoinFailed
            }
        }
    }

    async fn setup(&self, cancel: &CancellationToken, active: Option<&ActiveSession>) -> GroupEvent {
        if cancel.is_cancelled() {
            return GroupEvent::Cancelled;
        }

        let generation = active.map_or(0, |s| s.generation);
        let claims = active.map_or(0, |s| s.claims.len());
        let epoch = *self.ready.borrow() + 1;
        self.ready.send_replace(epoch);

        EventLogger::log_event(
            "group_ready",
            vec![
                KeyValue::new("group_id", self.group_id.clone()),
                KeyValue::new("generation", generation as i64),
                KeyValue::new("claims", claims as i64),
                KeyValue::new("epoch", epoch as i64),
            ],
        )
        .await;
        GroupEvent::Ready
    }

    async fn claim(&self, cancel: &CancellationToken, session: &mut ActiveSession) -> GroupEvent {
        let claims = std::mem::take(&mut session.claims);

        if claims.is_empty() {
            warn!(generation = session.generation, "No partitions assigned");
            tokio::select! {
                _ = session.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.rejoin_delay) => {}
            }
        } else {
            let committer_stop = CancellationToken::new();
            let committer = spawn_committer(
                Arc::clone(&session.offsets),
                self.auto_commit_interval,
                committer_stop.clone(),
            );

            let mut loops = JoinSet::new();
            for claim in claims {
                loops.spawn(claim_loop(
                    claim,
                    Arc::clone(&self.handler),
                    Arc::clone(&session.offsets),
                    Arc::clone(&self.metrics),
                    session.cancel.clone(),
                ));
            }

            let mut processed = 0;
            while let Some(joined) = loops.join_next().await {
                match joined {
                    Ok(count) => processed += count,
                    Err(e) => error!(error = %e, "Claim loop failed"),
                }
            }
            debug!(generation = session.generation, processed, "All claim loops returned");

            committer_stop.cancel();
            if let Err(e) = committer.await {
                error!(error = %e, "Offset committer failed");
            }
        }

        if cancel.is_cancelled() {
            GroupEvent::Cancelled
        } else {
            GroupEvent::SessionEnded
        }
    }

    async fn cleanup(&self, cancel: &CancellationToken, active: Option<ActiveSession>) -> GroupEvent {
        if let Some(session) = active {
            let ActiveSession {
                generation,
                offsets,
                outcome,
                cancel: session_cancel,
                ..
            } = session;

            if let Err(e) = commit_offsets(&offsets).await {
                warn!(generation, error = %e, "Final offset commit failed");
            }
            session_cancel.cancel();
            // The broker side may wait for every offset handle before reporting.
            drop(offsets);

            let failed = match outcome.await {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    error!(generation, error = %e, "Consumer session ended with error");
                    true
                }
                Err(_) => {
                    warn!(generation, "Consumer session ended without reporting");
                    false
                }
            };

            EventLogger::log_event(
                "session_ended",
                vec![
                    KeyValue::new("group_id", self.group_id.clone()),
                    KeyValue::new("generation", generation as i64),
                ],
            )
            .await;

            if failed {
                self.pause(cancel).await;
            }
        }

        if cancel.is_cancelled() {
            GroupEvent::Cancelled
        } else {
            GroupEvent::CleanedUp
        }
    }

    /// Sleeps for the rejoin delay unless cancelled first.
    async fn pause(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.rejoin_delay) => {}
        }
    }
}
