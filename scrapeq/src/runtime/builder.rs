use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::error::BuildError;
use crate::events::{FanOut, StatusChannel};
use crate::extract::Extractor;
use crate::queue::QueuePort;
use crate::retry::RetryPolicy;
use crate::store::JobStore;

use super::handler::MessageHandler;
use super::supervisor::ScrapeWorker;

/// Builder for a [`ScrapeWorker`] with explicit dependencies.
///
/// Queue, store and extractor are required. Without a status channel the
/// worker publishes into an empty [`FanOut`].
///
/// # Example
///
/// ```ignore
/// let worker = ScrapeWorkerBuilder::new(WorkerConfig::from_env())
///     .with_queue(queue)
///     .with_store(store)
///     .with_extractor(extractor)
///     .with_status(Arc::new(FanOut::new().with_sink(Arc::new(LogSink))))
///     .build()?;
/// worker.start().await?;
/// ```
pub struct ScrapeWorkerBuilder<Q, S, E>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
    E: Extractor + 'static,
{
    config: WorkerConfig,
    queue: Option<Arc<Q>>,
    store: Option<Arc<S>>,
    extractor: Option<Arc<E>>,
    status: Option<Arc<dyn StatusChannel>>,
    policy: Option<RetryPolicy>,
}

impl<Q, S, E> fmt::Debug for ScrapeWorkerBuilder<Q, S, E>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
    E: Extractor + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ScrapeWorkerBuilder");
        debug.field("config", &self.config);
        debug.field("queue_set", &self.queue.is_some());
        debug.field("store_set", &self.store.is_some());
        debug.field("extractor_set", &self.extractor.is_some());
        debug.field("status_set", &self.status.is_some());
        debug.field("policy", &self.policy);

        if self.queue.is_some() {
            debug.field("queue_type", &type_name::<Q>());
        }
        if self.store.is_some() {
            debug.field("store_type", &type_name::<S>());
        }
        if self.extractor.is_some() {
            debug.field("extractor_type", &type_name::<E>());
        }

        debug.finish()
    }
}

impl<Q, S, E> ScrapeWorkerBuilder<Q, S, E>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
    E: Extractor + 'static,
{
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            queue: None,
            store: None,
            extractor: None,
            status: None,
            policy: None,
        }
    }

    pub fn with_queue(mut self, queue: Arc<Q>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<E>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_status(mut self, status: Arc<dyn StatusChannel>) -> Self {
        self.status = Some(status);
        self
    }

    /// Override the policy derived from the config's backoff fields.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// # Errors
    ///
    /// Fails on an invalid config or a missing required dependency.
    pub fn build(self) -> Result<ScrapeWorker<Q, S, E>, BuildError> {
        self.config.validate()?;

        let queue = self.queue.ok_or(BuildError::Missing("queue"))?;
        let store = self.store.ok_or(BuildError::Missing("store"))?;
        let extractor = self.extractor.ok_or(BuildError::Missing("extractor"))?;
        let status = self
            .status
            .unwrap_or_else(|| Arc::new(FanOut::new()) as Arc<dyn StatusChannel>);
        let policy = self
            .policy
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config));

        let handler = MessageHandler::new(
            Arc::clone(&queue),
            store,
            Arc::clone(&extractor),
            status,
            policy,
            self.config.extract_timeout(),
        );
        Ok(ScrapeWorker::new(self.config, queue, extractor, handler))
    }
}
