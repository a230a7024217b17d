//! Extraction capability and its composable tiers.
//!
//! - [`StaticExtractor`]: plain HTTP fetch parsed with `scraper`.
//! - [`TieredExtractor`]: static first, rendered tier for thin pages.
//! - [`BoundedExtractor`]: caps concurrent calls into an expensive tier.

mod html;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

pub use crate::error::ExtractError;
pub use html::{StaticExtractor, parse_document};

/// Trait for anything that can turn a url into page content.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch and parse one page.
    async fn extract(&self, url: &Url) -> Result<ExtractedContent, ExtractError>;

    /// Release pooled resources. Called once on worker shutdown.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What an extractor pulled out of a page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContent {
    pub title: Option<String>,
    /// Visible body text with whitespace collapsed.
    pub text: String,
    /// Absolute http(s) links in document order, deduplicated.
    pub links: Vec<String>,
    /// Absolute image sources in document order, deduplicated.
    pub images: Vec<String>,
    pub metadata: PageMetadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub author: Option<String>,
    pub published_date: Option<String>,
}

/// Static tier first; pages whose text is `min_text_len` characters or
/// shorter are extracted again through the rendered tier.
///
/// A failing static tier is reported as-is and does not fall through.
#[derive(Debug)]
pub struct TieredExtractor<S, R> {
    static_tier: S,
    rendered_tier: R,
    min_text_len: usize,
}

impl<S, R> TieredExtractor<S, R>
where
    S: Extractor,
    R: Extractor,
{
    pub fn new(static_tier: S, rendered_tier: R, min_text_len: usize) -> Self {
        Self {
            static_tier,
            rendered_tier,
            min_text_len,
        }
    }
}

#[async_trait]
impl<S, R> Extractor for TieredExtractor<S, R>
where
    S: Extractor,
    R: Extractor,
{
    async fn extract(&self, url: &Url) -> Result<ExtractedContent, ExtractError> {
        let content = self.static_tier.extract(url).await?;
        let text_len = content.text.chars().count();
        if text_len > self.min_text_len {
            return Ok(content);
        }

        debug!(
            url = %url,
            text_len,
            min_text_len = self.min_text_len,
            "static content too thin, rendering"
        );
        self.rendered_tier.extract(url).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        let static_result = self.static_tier.close().await;
        self.rendered_tier.close().await?;
        static_result
    }
}

/// Limits how many extractions run through `inner` at once. Callers over
/// the limit wait for a slot rather than failing.
#[derive(Debug)]
pub struct BoundedExtractor<E> {
    inner: E,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl<E: Extractor> BoundedExtractor<E> {
    pub fn new(inner: E, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl<E: Extractor> Extractor for BoundedExtractor<E> {
    async fn extract(&self, url: &Url) -> Result<ExtractedContent, ExtractError> {
        let _permit = self.permits.acquire().await.map_err(|_| {
            ExtractError::Unavailable("extractor pool closed".to_string())
        })?;
        self.inner.extract(url).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.permits.close();
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct FixedText {
        text: &'static str,
        calls: AtomicUsize,
    }

    impl FixedText {
        fn new(text: &'static str) -> Self {
            Self {
                text,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Extractor for FixedText {
        async fn extract(
            &self,
            _url: &Url,
        ) -> Result<ExtractedContent, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExtractedContent {
                text: self.text.to_string(),
                ..ExtractedContent::default()
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl Extractor for Failing {
        async fn extract(
            &self,
            url: &Url,
        ) -> Result<ExtractedContent, ExtractError> {
            Err(ExtractError::HttpStatus {
                url: url.to_string(),
                status: 503,
            })
        }
    }

    struct Slow {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Extractor for Slow {
        async fn extract(
            &self,
            _url: &Url,
        ) -> Result<ExtractedContent, ExtractError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ExtractedContent::default())
        }
    }

    fn url() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    #[tokio::test]
    async fn test_tiered_keeps_rich_static_content() {
        let long = "word ".repeat(40);
        let long: &'static str = Box::leak(long.into_boxed_str());
        let tiered =
            TieredExtractor::new(FixedText::new(long), FixedText::new("rendered"), 100);

        let content = tiered.extract(&url()).await.unwrap();
        assert_eq!(content.text, long);
        assert_eq!(tiered.rendered_tier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tiered_renders_thin_pages() {
        let tiered = TieredExtractor::new(
            FixedText::new("loading..."),
            FixedText::new("rendered"),
            100,
        );

        let content = tiered.extract(&url()).await.unwrap();
        assert_eq!(content.text, "rendered");
        assert_eq!(tiered.static_tier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tiered_static_error_does_not_fall_through() {
        let tiered = TieredExtractor::new(Failing, FixedText::new("rendered"), 100);

        let err = tiered.extract(&url()).await.unwrap_err();
        assert!(matches!(err, ExtractError::HttpStatus { status: 503, .. }));
        assert_eq!(tiered.rendered_tier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bounded_extractor_caps_concurrency() {
        let bounded = Arc::new(BoundedExtractor::new(
            Slow {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
            2,
        ));

        let calls = (0..6).map(|_| {
            let bounded = bounded.clone();
            async move { bounded.extract(&url()).await }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(bounded.inner.peak.load(Ordering::SeqCst), 2);
        assert_eq!(bounded.available(), 2);
    }

    #[tokio::test]
    async fn test_bounded_extractor_refuses_after_close() {
        let bounded = BoundedExtractor::new(FixedText::new("x"), 1);
        bounded.close().await.unwrap();

        let err = bounded.extract(&url()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Unavailable(_)));
    }
}
