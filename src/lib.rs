//! # deepcrawl
//!
//! A deep crawling engine: given a seed URL, a fetcher, and a traversal
//! strategy, discovers and fetches pages breadth-first, depth-first, or in
//! best-first (score-ordered) order, subject to URL filters, URL/content
//! scorers, robots.txt policy, per-domain rate limiting, and a
//! memory-aware dispatcher.
//!
//! This crate does not fetch pages itself beyond robots.txt (bring your own
//! `Fetcher`, e.g. a headless-browser adapter), does not convert HTML to
//! markdown or run LLM extraction, and does not expose a CLI or HTTP
//! surface — those are the concerns of the systems this engine is embedded
//! in, not of the engine itself.
//!
//! ## Layout
//!
//! - [`url_normalize`]: candidate-URL canonicalization for dedup
//! - [`filters`]: the URL admission filter chain
//! - [`scorers`]: weighted multi-criteria URL scoring
//! - [`robots`]: per-origin robots.txt cache
//! - [`rate_limiter`]: per-domain politeness delay and backoff
//! - [`dispatcher`]: admission-controlled concurrent fetch execution
//! - [`strategy`]: BFS / DFS / Best-First traversal, sharing the
//!   [`strategy::DeepCrawl`] contract
//! - [`checkpoint`]: snapshot/resume of in-progress traversal state
//! - [`fetcher`]: the externally-supplied page-fetch boundary
//! - [`config`]: construction-time configuration and validation
//! - [`types`]: shared record types
//! - [`error`]: crate-wide error types

pub mod checkpoint;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fetcher;
pub mod filters;
pub mod rate_limiter;
pub mod robots;
pub mod scorers;
pub mod strategy;
pub mod types;
pub mod url_normalize;

pub use checkpoint::{CheckpointSink, CheckpointSource, FileCheckpointStore, OnStateChange};
pub use config::{DispatcherSettings, SpiderConfig};
pub use dispatcher::{DispatchEvent, Dispatcher, DispatcherConfig, MonitorCallback};
pub use error::{DeepCrawlError, Result};
pub use fetcher::{Fetcher, NullFetcher, ReqwestFetcher};
pub use filters::{
    CallbackFilter, ContentRelevanceFilter, ContentTypeFilter, DomainFilter, Filter, FilterChain,
    SeoFilter, UrlPatternFilter,
};
pub use rate_limiter::{DomainState, RateLimitConfig, RateLimiter, ReportOutcome};
pub use robots::RobotsCache;
pub use scorers::{
    CompositeScorer, ContentTypeScorer, DomainAuthorityScorer, FreshnessScorer,
    KeywordRelevanceScorer, PathDepthScorer, Scorer,
};
pub use strategy::{BestFirstStrategy, BfsStrategy, CancelHandle, DeepCrawl, DfsStrategy, ShouldContinue, TraversalDeps};
pub use types::{
    CheckpointRecord, FetchResult, FilterStatistics, FrontierEntry, Link, LinkSet,
    ScorerStatistics, StrategyTag,
};
