use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use crate::config::WorkerConfig;
use crate::extract::Extractor;
use crate::message::Envelope;
use crate::queue::{QueuePort, QueueSnapshot};
use crate::store::JobStore;
use crate::telemetry;

use super::handler::{MessageHandler, ProcessOutcome};
use super::shutdown::ShutdownToken;

/// Queue consumer that turns scrape messages into finished jobs.
///
/// One poll loop receives batches of up to `batch_size` messages and
/// spawns a task per message; a semaphore keeps at most `concurrency` of
/// them in flight. Each delivery is acknowledged on its own once its
/// outcome is recorded.
pub struct ScrapeWorker<Q, S, E>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
    E: Extractor + 'static,
{
    config: WorkerConfig,
    queue: Arc<Q>,
    extractor: Arc<E>,
    handler: Arc<MessageHandler<Q, S, E>>,
    permits: Arc<Semaphore>,
    shutdown_token: ShutdownToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    polling: AtomicBool,
    extractor_closed: AtomicBool,
}

impl<Q, S, E> fmt::Debug for ScrapeWorker<Q, S, E>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
    E: Extractor + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self.polling.load(Ordering::SeqCst);

        f.debug_struct("ScrapeWorker")
            .field("config", &self.config)
            .field("queue_type", &type_name::<Q>())
            .field("store_type", &type_name::<S>())
            .field("extractor_type", &type_name::<E>())
            .field("available_permits", &self.permits.available_permits())
            .field("running", &running)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<Q, S, E> ScrapeWorker<Q, S, E>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
    E: Extractor + 'static,
{
    pub(crate) fn new(
        config: WorkerConfig,
        queue: Arc<Q>,
        extractor: Arc<E>,
        handler: MessageHandler<Q, S, E>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency));
        Self {
            config,
            queue,
            extractor,
            handler: Arc::new(handler),
            permits,
            shutdown_token: ShutdownToken::new(),
            loop_handle: Mutex::new(None),
            polling: AtomicBool::new(false),
            extractor_closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Token that stops the poll loop when cancelled.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    /// Handle one delivery end to end, including its acknowledgment.
    pub async fn process_message(&self, envelope: Envelope) -> ProcessOutcome {
        self.handler.handle(envelope).await
    }

    /// Sample the queue's depth counters.
    pub async fn queue_snapshot(&self) -> anyhow::Result<QueueSnapshot> {
        let snapshot = self.queue.snapshot().await?;
        telemetry::set_queue_depth(&snapshot);
        Ok(snapshot)
    }

    /// Run the poll loop on the current task until the shutdown token is
    /// cancelled, then drain in-flight messages and close the extractor.
    ///
    /// Fails if the worker is already polling via `start` or another `run`.
    pub async fn run(&self) -> anyhow::Result<()> {
        if self.polling.swap(true, Ordering::SeqCst) {
            anyhow::bail!("scrape worker already started");
        }
        self.poll_loop().run().await;
        self.close_extractor().await
    }

    /// Spawn the poll loop onto the runtime. Stop it with [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut guard = self.loop_handle.lock().await;
        if self.shutdown_token.is_cancelled() {
            anyhow::bail!("scrape worker already shut down");
        }
        if self.polling.swap(true, Ordering::SeqCst) {
            anyhow::bail!("scrape worker already started");
        }

        let poll_loop = self.poll_loop();
        *guard = Some(tokio::spawn(async move { poll_loop.run().await }));
        Ok(())
    }

    /// Stop receiving, wait for in-flight messages, then close the extractor.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("initiating graceful shutdown of scrape worker");
        self.shutdown_token.cancel();

        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            // The loop bounds its own drain by the grace period.
            if let Err(err) = handle.await {
                tracing::warn!("poll loop task failed: {err:?}");
            }
        }

        self.close_extractor().await?;
        tracing::info!("scrape worker shutdown complete");
        Ok(())
    }

    fn poll_loop(&self) -> PollLoop<Q, S, E> {
        PollLoop {
            config: self.config.clone(),
            queue: Arc::clone(&self.queue),
            handler: Arc::clone(&self.handler),
            permits: Arc::clone(&self.permits),
            shutdown: self.shutdown_token.clone(),
        }
    }

    async fn close_extractor(&self) -> anyhow::Result<()> {
        if self.extractor_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.extractor.close().await.inspect_err(|err| {
            tracing::error!("extractor close error: {err:#}");
        })
    }
}

struct PollLoop<Q, S, E> {
    config: WorkerConfig,
    queue: Arc<Q>,
    handler: Arc<MessageHandler<Q, S, E>>,
    permits: Arc<Semaphore>,
    shutdown: ShutdownToken,
}

impl<Q, S, E> PollLoop<Q, S, E>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
    E: Extractor + 'static,
{
    async fn run(self) {
        tracing::info!(
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "scrape worker polling"
        );
        let mut in_flight = JoinSet::new();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join(joined);
            }
            telemetry::set_in_flight(in_flight.len());

            let Some(mut held) = self.reserve().await else {
                break;
            };

            let span = telemetry::receive_span(self.config.batch_size);
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self
                    .queue
                    .receive(self.config.batch_size, self.config.poll_wait())
                    .instrument(span.clone()) => received,
            };

            let batch = match received {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!("queue receive error: {err:#}");
                    drop(held);
                    if self.pause(self.config.error_backoff()).await {
                        break;
                    }
                    continue;
                }
            };
            span.record("received", batch.len());

            if batch.is_empty() {
                drop(held);
                if self.pause(self.config.idle_backoff()).await {
                    break;
                }
                continue;
            }
            telemetry::record_batch_received(batch.len());

            for envelope in batch {
                // Messages beyond the free slots wait here for a running one to finish.
                let permit = match held.pop() {
                    Some(permit) => permit,
                    None => match Arc::clone(&self.permits).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let handler = Arc::clone(&self.handler);
                in_flight.spawn(async move {
                    let _permit = permit;
                    handler.handle(envelope).await;
                });
            }
            telemetry::set_in_flight(in_flight.len());
        }

        self.drain(in_flight).await;
    }

    /// Wait for at least one free slot, then take every other free one.
    /// The loop never receives while all slots are busy.
    async fn reserve(&self) -> Option<Vec<OwnedSemaphorePermit>> {
        let first = tokio::select! {
            _ = self.shutdown.cancelled() => return None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok()?,
        };

        let mut held = vec![first];
        while held.len() < self.config.batch_size {
            match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => held.push(permit),
                Err(_) => break,
            }
        }
        Some(held)
    }

    /// Sleep unless shutdown arrives first. Returns true on shutdown.
    async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        let pending = in_flight.len();
        tracing::info!(pending, "scrape worker draining in-flight messages");

        let grace = self.config.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = in_flight.len(),
                "in-flight messages did not finish within {grace:?}, aborting"
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
        telemetry::set_in_flight(0);
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            tracing::error!("message task panicked: {err}");
        } else {
            tracing::warn!("message task cancelled: {err}");
        }
    }
}
