//! In-process channel job queue.
//!
//! Uses a bounded tokio mpsc channel shared by a pool of consumers. Delivery
//! is at-least-once: retryable handler failures are redelivered with
//! exponential backoff until `max_attempts`, then dead-lettered.
//!
//! Every accepted job is written to a [`JobOutbox`] before it enters the
//! channel and removed once it has been acked or dead-lettered. On shutdown
//! consumers drain what is already buffered; anything still in the outbox at
//! the next start is republished by [`ChannelJobQueue::recover`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{BusError, JobHandler, JobQueue, PublishOutcome, Result};
use crate::config::WorkerConfig;
use crate::dlq::{DeadLetter, DeadLetterPublisher, STAGE_REDELIVERY};
use crate::error::Classify;
use crate::interfaces::JobOutbox;
use crate::model::JobEnvelope;
use crate::utils::retry::redelivery_backoff;

/// Upper bound on orphaned jobs republished by one recovery pass.
const RECOVERY_BATCH: usize = 10_000;

/// In-memory job queue with a dedup window and a consumer pool.
pub struct ChannelJobQueue {
    sender: mpsc::Sender<JobEnvelope>,
    receiver: Arc<Mutex<mpsc::Receiver<JobEnvelope>>>,
    /// Dedup id -> first publish time.
    recent: Mutex<HashMap<String, Instant>>,
    config: WorkerConfig,
    dead_letters: Arc<dyn DeadLetterPublisher>,
    outbox: Arc<dyn JobOutbox>,
    /// Outbox rows written before this instant belong to a previous process.
    started_at: DateTime<Utc>,
}

impl ChannelJobQueue {
    pub fn new(
        config: WorkerConfig,
        dead_letters: Arc<dyn DeadLetterPublisher>,
        outbox: Arc<dyn JobOutbox>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));

        info!(
            capacity = config.queue_capacity,
            dedup_window_secs = config.dedup_window_secs,
            "Channel job queue initialized"
        );

        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            recent: Mutex::new(HashMap::new()),
            config,
            dead_letters,
            outbox,
            started_at: Utc::now(),
        }
    }

    /// Spawn `concurrency` consumers. They stop once `shutdown` flips to true.
    pub fn start(
        &self,
        handler: Arc<dyn JobHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let workers = self.config.concurrency.max(1);
        info!(workers, "Starting job consumers");

        (0..workers)
            .map(|worker| {
                let consumer = Consumer {
                    worker,
                    receiver: self.receiver.clone(),
                    handler: handler.clone(),
                    backoff: redelivery_backoff(&self.config),
                    dead_letters: self.dead_letters.clone(),
                    outbox: self.outbox.clone(),
                };
                tokio::spawn(consumer.run(shutdown.clone()))
            })
            .collect()
    }

    async fn remember(&self, dedup_id: &str) -> bool {
        let now = Instant::now();
        let window = self.config.dedup_window();
        let mut recent = self.recent.lock().await;
        recent.retain(|_, seen| now.duration_since(*seen) < window);
        if recent.contains_key(dedup_id) {
            return false;
        }
        recent.insert(dedup_id.to_string(), now);
        true
    }

    async fn forget(&self, dedup_id: &str) {
        self.recent.lock().await.remove(dedup_id);
    }

    /// Republish jobs left in the outbox by a previous process.
    ///
    /// Call after [`start`](Self::start) so a backlog larger than the channel
    /// does not block. Returns the number of jobs republished.
    pub async fn recover(&self) -> Result<usize> {
        let orphans = self
            .outbox
            .list_unacked(self.started_at, RECOVERY_BATCH)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        if orphans.is_empty() {
            debug!("No orphaned jobs to recover");
            return Ok(0);
        }

        let found = orphans.len();
        info!(count = found, "Recovering orphaned jobs");
        let mut recovered = 0;
        for job in orphans {
            self.remember(&job.dedup_id).await;
            let message_id = job.message_id;
            if self.sender.send(job).await.is_err() {
                warn!(%message_id, "Queue closed during recovery");
                return Err(BusError::Closed);
            }
            recovered += 1;
        }
        if found == RECOVERY_BATCH {
            warn!(
                count = found,
                "Recovery batch full, remaining jobs will be recovered on next start"
            );
        }
        Ok(recovered)
    }
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(dedup_id = %job.dedup_id, kind = job.payload.kind()))]
    async fn publish(&self, job: JobEnvelope) -> Result<PublishOutcome> {
        if !self.remember(&job.dedup_id).await {
            debug!("Dropping duplicate publish inside dedup window");
            return Ok(PublishOutcome::Deduplicated);
        }

        if let Err(e) = self.outbox.insert(&job, Utc::now()).await {
            error!(error = %e, "Failed to record job in outbox");
            self.forget(&job.dedup_id).await;
            return Err(BusError::Publish(e.to_string()));
        }

        let dedup_id = job.dedup_id.clone();
        let message_id = job.message_id;
        if self.sender.send(job).await.is_err() {
            self.forget(&dedup_id).await;
            if let Err(e) = self.outbox.ack(message_id).await {
                warn!(%message_id, error = %e, "Failed to drop unsent job from outbox");
            }
            return Err(BusError::Closed);
        }
        Ok(PublishOutcome::Enqueued)
    }
}

struct Consumer {
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<JobEnvelope>>>,
    handler: Arc<dyn JobHandler>,
    backoff: ExponentialBuilder,
    dead_letters: Arc<dyn DeadLetterPublisher>,
    outbox: Arc<dyn JobOutbox>,
}

impl Consumer {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            let job = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    job = receiver.recv() => job,
                    _ = shutdown.changed() => None,
                }
            };
            let Some(job) = job else {
                break;
            };
            self.process(job).await;
        }

        // Finish what was accepted before shutdown.
        let mut drained = 0usize;
        loop {
            let job = self.receiver.lock().await.try_recv().ok();
            let Some(job) = job else {
                break;
            };
            self.process(job).await;
            drained += 1;
        }
        info!(worker = self.worker, drained, "Job consumer stopped");
    }

    async fn process(&self, job: JobEnvelope) {
        let message_id = job.message_id;
        deliver(
            self.handler.as_ref(),
            self.backoff,
            self.dead_letters.as_ref(),
            job,
        )
        .await;
        // Left in place, the row is republished on the next start and the
        // processed-signal ledger absorbs the repeat.
        if let Err(e) = self.outbox.ack(message_id).await {
            warn!(%message_id, error = %e, "Failed to clear job from outbox");
        }
    }
}

/// Deliver one job until it is acknowledged, fails permanently, or runs out
/// of attempts. Returns the number of deliveries made.
pub(crate) async fn deliver(
    handler: &dyn JobHandler,
    backoff: ExponentialBuilder,
    dead_letters: &dyn DeadLetterPublisher,
    job: JobEnvelope,
) -> u32 {
    let attempts = AtomicU32::new(0);
    let counter = &attempts;
    let original = &job;

    let result = (move || async move {
        let mut delivery = original.clone();
        delivery.attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        handler.handle(&delivery).await
    })
    .retry(backoff)
    .when(|e: &BusError| e.is_retryable())
    .notify(|e: &BusError, delay: Duration| {
        warn!(
            message_id = %job.message_id,
            error = %e,
            delay = ?delay,
            "Job failed, redelivering"
        );
    })
    .await;

    let made = attempts.load(Ordering::SeqCst);
    match result {
        Ok(()) => {
            debug!(message_id = %job.message_id, attempts = made, "Job acknowledged");
        }
        Err(e) => {
            let stage = match &e {
                BusError::HandlerFailed { stage, .. } if !e.is_retryable() => stage.as_str(),
                _ => STAGE_REDELIVERY,
            };
            let mut failed = job.clone();
            failed.attempt = made;
            match DeadLetter::from_job(&failed, stage, &e.to_string(), e.class(), Utc::now()) {
                Ok(dead_letter) => {
                    if let Err(publish_err) = dead_letters.publish(dead_letter).await {
                        error!(
                            message_id = %job.message_id,
                            error = %publish_err,
                            "Failed to dead-letter job"
                        );
                    }
                }
                Err(build_err) => {
                    error!(
                        message_id = %job.message_id,
                        error = %build_err,
                        "Failed to build dead letter"
                    );
                }
            }
        }
    }
    made
}

#[cfg(test)]
mod tests;
