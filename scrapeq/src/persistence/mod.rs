/// PostgreSQL implementation of [`JobStore`](crate::store::JobStore).
///
/// `PostgresJobStore` keeps job records in `scrape_jobs` and page content
/// in `scraped_content`; `ensure_schema` creates both.
pub mod postgres;

pub use postgres::PostgresJobStore;
