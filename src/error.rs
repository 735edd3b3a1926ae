//! Crate-wide error types.
//!
//! Most call sites return `anyhow::Result` (the ambient `Result` alias below),
//! matching `riptide-utils::error`'s dual-error-handling idiom: `anyhow` for
//! application call sites, `thiserror` for the few variants a caller actually
//! needs to match on.

pub use anyhow::{anyhow, bail, Context, Error as AnyhowError, Result as AnyhowResult};

/// Convenience alias used throughout the crate's internal call sites.
pub type Result<T> = std::result::Result<T, AnyhowError>;

/// Structured errors a caller may want to distinguish from an ordinary
/// per-URL fetch failure (which never escapes as an `Err` — see
/// `FetchResult::success`).
#[derive(thiserror::Error, Debug)]
pub enum DeepCrawlError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("fetcher error: {0}")]
    FetcherError(String),

    #[error("robots fetch failed for {origin}: {source}")]
    RobotsFetchFailed { origin: String, source: String },

    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),

    #[error("crawl cancelled")]
    Cancelled,
}
