//! In-memory pipeline example.
//!
//! Submits a handful of jobs to scrapeq-testkit's in-memory queue and store,
//! runs a worker over a scripted extractor, and prints every status event.
//! One url always fails so the retry and dead-letter path shows up too.
//!
//! Run with: `RUST_LOG=scrapeq=debug cargo run --example in_memory_pipeline`

use std::sync::Arc;
use std::time::Duration;

use scrapeq::*;
use scrapeq_testkit::{
    InMemoryJobStore, InMemoryQueue, ScriptedExtractor, Step, page, wait_until,
};
use tracing_subscriber::EnvFilter;

const URLS: &[&str] = &[
    "https://example.com/",
    "https://example.org/docs",
    "https://example.net/blog",
    "https://broken.example.com/",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let queue = Arc::new(InMemoryQueue::new());
    let store = Arc::new(InMemoryJobStore::new());

    let extractor = ScriptedExtractor::new();
    extractor.set_delay(Duration::from_millis(150));
    extractor.script("https://example.org/docs", [Step::Succeed(page("Docs"))]);
    extractor.script(
        "https://broken.example.com/",
        std::iter::repeat_n(Step::Fail("connection reset".into()), 10),
    );
    let extractor = Arc::new(extractor);

    let broadcast = Arc::new(BroadcastSink::new(64));
    let mut events = broadcast.subscribe();
    let status: Arc<dyn StatusChannel> = Arc::new(
        FanOut::new()
            .with_sink(broadcast.clone())
            .with_sink(Arc::new(LogSink)),
    );

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("[EVENT] {} {} {}", event.job_id, event.status, event.url);
        }
    });

    let config = WorkerConfig::from_env()
        .with_poll_wait(1)
        .with_idle_backoff(100)
        .with_backoff(200, 1_000)
        .with_default_max_retries(2);

    let submitter = JobSubmitter::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::clone(&status),
        config.default_max_retries,
    );
    let mut records = Vec::new();
    for result in submitter.submit_many(URLS.iter().copied(), JobPriority::Medium).await? {
        records.push(result?);
    }

    let worker = ScrapeWorkerBuilder::new(config)
        .with_queue(Arc::clone(&queue))
        .with_store(Arc::clone(&store))
        .with_extractor(extractor)
        .with_status(status)
        .build()?;
    worker.start().await?;

    let all_terminal = wait_until(Duration::from_secs(30), || {
        records
            .iter()
            .all(|r| store.record(r.id).is_some_and(|r| r.is_terminal()))
    });
    tokio::select! {
        finished = all_terminal => {
            if !finished {
                println!("[MAIN] Timed out waiting for jobs");
            }
        }
        _ = tokio::signal::ctrl_c() => println!("[MAIN] Interrupted"),
    }

    worker.shutdown().await?;
    printer.abort();

    for record in store.list_recent(URLS.len()).await? {
        println!(
            "[RESULT] {} {} retries={} error={:?}",
            record.url, record.status, record.retry_count, record.error_message
        );
    }
    println!("[MAIN] Dead letters: {}", queue.dead_letters().len());
    Ok(())
}
