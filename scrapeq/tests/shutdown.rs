//! Lifecycle tests for the scrape worker: start, run, drain and abort.

use std::sync::Arc;
use std::time::Duration;

use scrapeq::{
    BuildError, FanOut, JobPriority, JobRecord, JobStatus, JobSubmitter, ScrapeWorker,
    ScrapeWorkerBuilder, StatusChannel, WorkerConfig,
};
use scrapeq_testkit::{
    InMemoryJobStore, InMemoryQueue, ScriptedExtractor, Step, wait_until,
};
use tokio::time::timeout;

const URL: &str = "https://example.com/slow";

type Worker = ScrapeWorker<InMemoryQueue, InMemoryJobStore, ScriptedExtractor>;

struct Fixture {
    queue: Arc<InMemoryQueue>,
    store: Arc<InMemoryJobStore>,
    extractor: Arc<ScriptedExtractor>,
    worker: Worker,
}

fn test_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_batch_size(4)
        .with_concurrency(2)
        .with_poll_wait(0)
        .with_idle_backoff(5)
        .with_extract_timeout(10_000)
        .with_backoff(10, 40)
        .with_shutdown_grace(5)
}

impl Fixture {
    fn new(config: WorkerConfig, extractor: ScriptedExtractor) -> Self {
        let queue = Arc::new(InMemoryQueue::new());
        let store = Arc::new(InMemoryJobStore::new());
        let extractor = Arc::new(extractor);
        let worker = ScrapeWorkerBuilder::new(config)
            .with_queue(Arc::clone(&queue))
            .with_store(Arc::clone(&store))
            .with_extractor(Arc::clone(&extractor))
            .build()
            .expect("valid worker");

        Self {
            queue,
            store,
            extractor,
            worker,
        }
    }

    async fn submit(&self, count: usize) -> Vec<JobRecord> {
        let status: Arc<dyn StatusChannel> = Arc::new(FanOut::new());
        let submitter =
            JobSubmitter::new(Arc::clone(&self.queue), Arc::clone(&self.store), status, 3);
        let mut records = Vec::new();
        for _ in 0..count {
            records.push(submitter.submit(URL, JobPriority::Low).await.unwrap());
        }
        records
    }

    fn status(&self, record: &JobRecord) -> Option<JobStatus> {
        self.store.record(record.id).map(|r| r.status)
    }
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_messages() {
    let extractor = ScriptedExtractor::new();
    extractor.set_delay(Duration::from_millis(150));
    let fixture = Fixture::new(test_config(), extractor);
    let records = fixture.submit(2).await;

    fixture.worker.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || fixture.extractor.active() == 2).await);

    fixture.worker.shutdown().await.unwrap();

    for record in &records {
        assert_eq!(fixture.status(record), Some(JobStatus::Completed));
    }
    assert!(fixture.queue.is_empty());
    assert!(fixture.extractor.is_closed());
}

#[tokio::test]
async fn test_shutdown_aborts_work_past_grace_period() {
    let fixture = Fixture::new(
        test_config().with_shutdown_grace(0),
        ScriptedExtractor::with_fallback(Step::Hang),
    );
    let records = fixture.submit(1).await;

    fixture.worker.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || fixture.extractor.active() == 1).await);

    timeout(Duration::from_secs(2), fixture.worker.shutdown())
        .await
        .expect("shutdown bounded by grace period")
        .unwrap();

    // The aborted delivery was never acknowledged, so the queue keeps it.
    assert_eq!(fixture.status(&records[0]), Some(JobStatus::Processing));
    assert_eq!(fixture.queue.len(), 1);
    assert_eq!(fixture.extractor.active(), 0);
    assert!(fixture.extractor.is_closed());
}

#[tokio::test]
async fn test_run_returns_when_token_cancelled() {
    let fixture = Fixture::new(test_config(), ScriptedExtractor::new());
    let records = fixture.submit(3).await;
    let token = fixture.worker.shutdown_token();

    let (result, ()) = tokio::join!(fixture.worker.run(), async {
        wait_until(Duration::from_secs(5), || {
            records
                .iter()
                .all(|r| fixture.status(r) == Some(JobStatus::Completed))
        })
        .await;
        token.cancel();
    });

    result.unwrap();
    assert!(fixture.extractor.is_closed());
    assert!(fixture.queue.is_empty());
}

#[tokio::test]
async fn test_start_is_rejected_twice_and_after_shutdown() {
    let fixture = Fixture::new(test_config(), ScriptedExtractor::new());

    fixture.worker.start().await.unwrap();
    assert!(fixture.worker.start().await.is_err());

    fixture.worker.shutdown().await.unwrap();
    assert!(fixture.worker.start().await.is_err());
    assert!(fixture.worker.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn test_run_is_rejected_while_polling() {
    let fixture = Fixture::new(test_config(), ScriptedExtractor::new());

    fixture.worker.start().await.unwrap();
    let err = timeout(Duration::from_secs(1), fixture.worker.run())
        .await
        .expect("second poll loop refused immediately")
        .unwrap_err();
    assert!(err.to_string().contains("already started"));
    fixture.worker.shutdown().await.unwrap();

    let other = Fixture::new(test_config(), ScriptedExtractor::new());
    let token = other.worker.shutdown_token();
    let (first, second, ()) = tokio::join!(
        other.worker.run(),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            other.worker.run().await
        },
        async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            token.cancel();
        }
    );
    first.unwrap();
    assert!(second.is_err());
}

#[tokio::test]
async fn test_shutdown_without_start_closes_extractor() {
    let fixture = Fixture::new(test_config(), ScriptedExtractor::new());

    fixture.worker.shutdown().await.unwrap();
    fixture.worker.shutdown().await.unwrap();
    assert!(fixture.extractor.is_closed());
}

#[tokio::test]
async fn test_queue_snapshot_reports_depth() {
    let fixture = Fixture::new(test_config(), ScriptedExtractor::new());
    fixture.submit(3).await;

    let snapshot = fixture.worker.queue_snapshot().await.unwrap();
    assert_eq!(snapshot.available, 3);
    assert_eq!(snapshot.outstanding(), 3);
}

#[test]
fn test_builder_requires_dependencies() {
    let err = ScrapeWorkerBuilder::<InMemoryQueue, InMemoryJobStore, ScriptedExtractor>::new(
        test_config(),
    )
    .with_store(Arc::new(InMemoryJobStore::new()))
    .with_extractor(Arc::new(ScriptedExtractor::new()))
    .build()
    .unwrap_err();

    assert!(matches!(err, BuildError::Missing("queue")));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = ScrapeWorkerBuilder::new(test_config().with_concurrency(8))
        .with_queue(Arc::new(InMemoryQueue::new()))
        .with_store(Arc::new(InMemoryJobStore::new()))
        .with_extractor(Arc::new(ScriptedExtractor::new()))
        .build()
        .unwrap_err();

    assert!(matches!(err, BuildError::Config(_)));
}
