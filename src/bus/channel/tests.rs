use super::*;
use crate::dlq::ChannelDeadLetterPublisher;
use crate::error::ErrorClass;
use crate::model::{CanonicalTenantId, ClickIds, JobPayload, SealJob};
use crate::storage::mock::MockJobOutbox;
use std::sync::atomic::AtomicU32;
use uuid::Uuid;

fn make_job(sale_id: &str) -> JobEnvelope {
    JobEnvelope::new(
        format!("seal:{sale_id}"),
        JobPayload::Seal(SealJob {
            tenant: CanonicalTenantId(Uuid::new_v4()),
            call_id: None,
            sale_id: sale_id.to_string(),
            amount_cents: 100,
            currency: "EUR".to_string(),
            session_id: None,
            click_ids: ClickIds::default(),
            sealed_at: Utc::now(),
        }),
    )
}

fn test_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        max_attempts: 3,
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
        dedup_window_secs: 60,
        ..Default::default()
    }
}

/// Fails the first `failures` deliveries with `class`, then acknowledges.
struct ScriptedHandler {
    failures: u32,
    class: ErrorClass,
    calls: AtomicU32,
    delivered: mpsc::UnboundedSender<JobEnvelope>,
}

impl ScriptedHandler {
    fn new(failures: u32, class: ErrorClass) -> (Self, mpsc::UnboundedReceiver<JobEnvelope>) {
        let (delivered, rx) = mpsc::unbounded_channel();
        (
            Self {
                failures,
                class,
                calls: AtomicU32::new(0),
                delivered,
            },
            rx,
        )
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    async fn handle(&self, job: &JobEnvelope) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(BusError::handler("domain", "scripted failure", self.class));
        }
        let _ = self.delivered.send(job.clone());
        Ok(())
    }
}

/// Acknowledges every job after `delay`.
struct SlowHandler {
    delay: Duration,
    handled: AtomicU32,
}

#[async_trait]
impl JobHandler for SlowHandler {
    async fn handle(&self, _job: &JobEnvelope) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn queue_with_outbox() -> (ChannelJobQueue, Arc<MockJobOutbox>) {
    let (dlq, _rx) = ChannelDeadLetterPublisher::new();
    let outbox = Arc::new(MockJobOutbox::new());
    let queue = ChannelJobQueue::new(test_config(), Arc::new(dlq), outbox.clone());
    (queue, outbox)
}

#[tokio::test(start_paused = true)]
async fn test_publish_drops_duplicate_inside_window() {
    let (queue, _outbox) = queue_with_outbox();

    assert_eq!(
        queue.publish(make_job("a")).await.unwrap(),
        PublishOutcome::Enqueued
    );
    assert_eq!(
        queue.publish(make_job("a")).await.unwrap(),
        PublishOutcome::Deduplicated
    );
    assert_eq!(
        queue.publish(make_job("b")).await.unwrap(),
        PublishOutcome::Enqueued
    );

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(
        queue.publish(make_job("a")).await.unwrap(),
        PublishOutcome::Enqueued
    );
}

#[tokio::test]
async fn test_consumers_deliver_published_jobs() {
    let (queue, outbox) = queue_with_outbox();
    let (handler, mut delivered) = ScriptedHandler::new(0, ErrorClass::Transient);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = queue.start(Arc::new(handler), shutdown_rx);

    for sale in ["a", "b", "c"] {
        queue.publish(make_job(sale)).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let job = delivered.recv().await.expect("job delivered");
        assert_eq!(job.attempt, 1);
        seen.push(job.dedup_id);
    }
    seen.sort();
    assert_eq!(seen, vec!["seal:a", "seal:b", "seal:c"]);

    shutdown_tx.send(true).unwrap();
    for worker in workers {
        worker.await.unwrap();
    }
    assert_eq!(outbox.len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_buffered_jobs() {
    let (queue, outbox) = queue_with_outbox();
    for i in 0..10 {
        queue.publish(make_job(&format!("sale-{i}"))).await.unwrap();
    }
    assert_eq!(outbox.len().await, 10);

    let handler = Arc::new(SlowHandler {
        delay: Duration::from_millis(50),
        handled: AtomicU32::new(0),
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = queue.start(handler.clone(), shutdown_rx);

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown_tx.send(true).unwrap();
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(handler.handled.load(Ordering::SeqCst), 10);
    assert_eq!(outbox.len().await, 0);
}

#[tokio::test]
async fn test_outbox_failure_rejects_publish() {
    let (queue, outbox) = queue_with_outbox();
    outbox.set_unavailable(true).await;

    let err = queue.publish(make_job("a")).await.unwrap_err();
    assert!(matches!(err, BusError::Publish(_)));

    // The dedup window must not swallow the retry.
    outbox.set_unavailable(false).await;
    assert_eq!(
        queue.publish(make_job("a")).await.unwrap(),
        PublishOutcome::Enqueued
    );
    assert_eq!(outbox.len().await, 1);
}

#[tokio::test]
async fn test_recover_republishes_orphaned_jobs() {
    let outbox = Arc::new(MockJobOutbox::new());
    let orphan = make_job("orphan");
    outbox
        .insert(&orphan, Utc::now() - chrono::Duration::minutes(5))
        .await
        .unwrap();

    let (dlq, _dlq_rx) = ChannelDeadLetterPublisher::new();
    let queue = ChannelJobQueue::new(test_config(), Arc::new(dlq), outbox.clone());
    // Written by this process, so not an orphan.
    outbox
        .insert(&make_job("fresh"), Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();

    let (handler, mut delivered) = ScriptedHandler::new(0, ErrorClass::Transient);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = queue.start(Arc::new(handler), shutdown_rx);

    assert_eq!(queue.recover().await.unwrap(), 1);
    let job = delivered.recv().await.expect("orphan delivered");
    assert_eq!(job.message_id, orphan.message_id);

    // A late duplicate of the recovered job is absorbed by the dedup window.
    assert_eq!(
        queue.publish(make_job("orphan")).await.unwrap(),
        PublishOutcome::Deduplicated
    );

    shutdown_tx.send(true).unwrap();
    for worker in workers {
        worker.await.unwrap();
    }
    assert_eq!(outbox.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_redelivered() {
    let (dlq, mut dlq_rx) = ChannelDeadLetterPublisher::new();
    let (handler, mut delivered) = ScriptedHandler::new(2, ErrorClass::Transient);

    let made = deliver(
        &handler,
        redelivery_backoff(&test_config()),
        &dlq,
        make_job("a"),
    )
    .await;

    assert_eq!(made, 3);
    assert_eq!(delivered.recv().await.unwrap().attempt, 3);
    assert!(dlq_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_job_is_dead_lettered() {
    let (dlq, mut dlq_rx) = ChannelDeadLetterPublisher::new();
    let (handler, _delivered) = ScriptedHandler::new(u32::MAX, ErrorClass::Transient);
    let job = make_job("a");

    let made = deliver(&handler, redelivery_backoff(&test_config()), &dlq, job.clone()).await;

    assert_eq!(made, 3);
    let dead_letter = dlq_rx.recv().await.unwrap();
    assert_eq!(dead_letter.stage, STAGE_REDELIVERY);
    assert_eq!(dead_letter.attempts, 3);
    assert_eq!(dead_letter.queue_message_id, job.message_id);
    assert_eq!(dead_letter.error_class, "transient");
}

#[tokio::test]
async fn test_permanent_failure_is_not_redelivered() {
    let (dlq, mut dlq_rx) = ChannelDeadLetterPublisher::new();
    let (handler, _delivered) = ScriptedHandler::new(1, ErrorClass::Permanent);

    let made = deliver(&handler, redelivery_backoff(&test_config()), &dlq, make_job("a")).await;

    assert_eq!(made, 1);
    let dead_letter = dlq_rx.recv().await.unwrap();
    assert_eq!(dead_letter.stage, "domain");
    assert_eq!(dead_letter.attempts, 1);
}
