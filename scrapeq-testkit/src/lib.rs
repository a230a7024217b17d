//! In-memory collaborators for exercising the scrapeq pipeline without a
//! queue service, database or network.

pub mod extractor;
pub mod queue;
pub mod sink;
pub mod store;

use std::time::Duration;

pub use extractor::{ScriptedExtractor, Step, page};
pub use queue::{DeadLetter, InMemoryQueue, SentMessage};
pub use sink::RecordingSink;
pub use store::InMemoryJobStore;

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// passes. Returns whether it held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
