use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scrapeq::{ExtractError, ExtractedContent, Extractor, PageMetadata};
use url::Url;

/// What one scripted extraction does.
#[derive(Clone, Debug)]
pub enum Step {
    Succeed(ExtractedContent),
    Fail(String),
    /// Never returns; exercises the worker's extraction timeout.
    Hang,
}

/// Page content with a title and enough text to pass any thin-page check.
pub fn page(title: &str) -> ExtractedContent {
    ExtractedContent {
        title: Some(title.to_string()),
        text: format!("{title} ").repeat(40).trim_end().to_string(),
        links: vec!["https://example.com/next".to_string()],
        images: Vec::new(),
        metadata: PageMetadata::default(),
    }
}

/// [`Extractor`] driven by per-url scripts.
///
/// Each call pops the next step scripted for its url; once a script runs
/// out, the fallback step applies. Tracks calls, current and peak
/// concurrency, and whether `close` was called.
#[derive(Clone, Debug)]
pub struct ScriptedExtractor {
    inner: Arc<ExtractorState>,
}

#[derive(Debug)]
struct ExtractorState {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    fallback: Mutex<Step>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    closed: AtomicBool,
}

struct ActiveGuard<'a>(&'a ExtractorState);

impl<'a> ActiveGuard<'a> {
    fn enter(state: &'a ExtractorState) -> Self {
        let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(active, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedExtractor {
    /// Every url succeeds with [`page`] unless scripted otherwise.
    pub fn new() -> Self {
        Self::with_fallback(Step::Succeed(page("Example Domain")))
    }

    pub fn with_fallback(fallback: Step) -> Self {
        Self {
            inner: Arc::new(ExtractorState {
                scripts: Mutex::new(HashMap::new()),
                fallback: Mutex::new(fallback),
                delay: Mutex::new(Duration::ZERO),
                calls: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Queue steps for `url`, consumed one per call.
    pub fn script(&self, url: &str, steps: impl IntoIterator<Item = Step>) -> &Self {
        self.inner
            .scripts
            .lock()
            .entry(normalize(url))
            .or_default()
            .extend(steps);
        self
    }

    /// Sleep this long inside every call before acting on its step.
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock() = delay;
    }

    /// Urls in call order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        let url = normalize(url);
        self.inner.calls.lock().iter().filter(|c| **c == url).count()
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Highest number of extractions ever running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn next_step(&self, url: &str) -> Step {
        let scripted = self
            .inner
            .scripts
            .lock()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.inner.fallback.lock().clone())
    }
}

impl Default for ScriptedExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, url: &Url) -> Result<ExtractedContent, ExtractError> {
        if self.is_closed() {
            return Err(ExtractError::Unavailable("extractor closed".to_string()));
        }

        let _active = ActiveGuard::enter(&self.inner);
        self.inner.calls.lock().push(url.as_str().to_string());
        let step = self.next_step(url.as_str());

        let delay = *self.inner.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match step {
            Step::Succeed(content) => Ok(content),
            Step::Fail(reason) => Err(ExtractError::Render(reason)),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(String::from)
        .unwrap_or_else(|_| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let extractor = ScriptedExtractor::new();
        extractor.script("https://example.com", [Step::Fail("boom".into())]);
        let url = Url::parse("https://example.com").unwrap();

        assert!(matches!(
            extractor.extract(&url).await,
            Err(ExtractError::Render(_))
        ));
        let content = extractor.extract(&url).await.unwrap();
        assert_eq!(content.title.as_deref(), Some("Example Domain"));
        assert_eq!(extractor.calls_for("https://example.com/"), 2);
        assert_eq!(extractor.active(), 0);
        assert_eq!(extractor.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_closed_extractor_is_unavailable() {
        let extractor = ScriptedExtractor::new();
        extractor.close().await.unwrap();

        let url = Url::parse("https://example.com").unwrap();
        assert!(matches!(
            extractor.extract(&url).await,
            Err(ExtractError::Unavailable(_))
        ));
        assert!(extractor.calls().is_empty());
    }
}
