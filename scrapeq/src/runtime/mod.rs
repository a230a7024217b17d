/// Builder wiring ports into a worker.
pub mod builder;
/// Per-delivery processing: guard, extract, complete or retry.
mod handler;
/// Graceful shutdown signalling.
pub mod shutdown;
/// Poll loop, bounded concurrency and drain.
pub mod supervisor;

pub use builder::ScrapeWorkerBuilder;
pub use handler::{DropReason, ProcessOutcome, SkipReason};
pub use shutdown::ShutdownToken;
pub use supervisor::ScrapeWorker;
