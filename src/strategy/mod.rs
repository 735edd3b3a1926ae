//! Traversal strategies (§4.G): BFS, DFS, and Best-First share one contract
//! (`DeepCrawl`) and a link-discovery helper; they differ only in the
//! frontier's data structure and its drain order, mirroring
//! `deep_crawling`'s `base_strategy.py` / `bfs_strategy.py` /
//! `dfs_strategy.py` / `bff_strategy.py` split in the source this engine was
//! distilled from.

mod best_first;
mod bfs;
mod dfs;

pub use best_first::BestFirstStrategy;
pub use bfs::BfsStrategy;
pub use dfs::DfsStrategy;

use crate::checkpoint::{CheckpointSink, OnStateChange};
use crate::config::SpiderConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::filters::FilterChain;
use crate::scorers::CompositeScorer;
use crate::types::{CheckpointRecord, FetchResult, FrontierEntry};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use url::Url;

/// Caller-supplied continuation predicate, checked once per batch. A panic
/// inside the predicate is treated as `true` (continue), per §4.I.
pub type ShouldContinue = Arc<dyn Fn() -> bool + Send + Sync>;

pub(crate) fn check_should_continue(predicate: &Option<ShouldContinue>) -> bool {
    match predicate {
        None => true,
        Some(f) => catch_unwind(AssertUnwindSafe(|| f())).unwrap_or(true),
    }
}

/// Shared, cloneable cancellation flag. `cancel()` is idempotent and visible
/// to an in-flight `arun` at the next suspension point (§5).
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The collaborators every strategy is built from. Bundled so construction
/// sites (and tests) don't have to thread five separate arguments through
/// three constructors.
pub struct TraversalDeps {
    pub filter_chain: Arc<FilterChain>,
    pub scorer: Option<Arc<CompositeScorer>>,
    pub dispatcher: Arc<Dispatcher>,
    pub checkpoint_sink: Option<Arc<dyn CheckpointSink>>,
    pub on_state_change: Option<OnStateChange>,
    pub should_continue: Option<ShouldContinue>,
}

impl TraversalDeps {
    pub fn new(filter_chain: Arc<FilterChain>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            filter_chain,
            scorer: None,
            dispatcher,
            checkpoint_sink: None,
            on_state_change: None,
            should_continue: None,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<CompositeScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_checkpoint_sink(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.checkpoint_sink = Some(sink);
        self
    }

    pub fn with_on_state_change(mut self, callback: OnStateChange) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    pub fn with_should_continue(mut self, predicate: ShouldContinue) -> Self {
        self.should_continue = Some(predicate);
        self
    }
}

/// Shared contract every traversal strategy implements (§4.G). A resumed
/// crawl is reconstructed with the concrete strategy matching the
/// checkpoint's `strategy_tag`; `arun` then continues from its restored
/// frontier rather than re-seeding.
#[async_trait]
pub trait DeepCrawl: Send + Sync {
    /// Admission gate applied to every candidate before it enters the
    /// frontier: depth bound plus the filter chain.
    async fn can_process(&self, filter_chain: &FilterChain, fetcher: &dyn Fetcher, url: &Url, depth: usize, max_depth: usize) -> bool {
        depth <= max_depth && filter_chain.apply(url, fetcher).await
    }

    /// Extracts admissible links from a fetch result, normalizes and
    /// dedups them against `visited`, and appends newly discovered entries
    /// to `out_frontier`. Shared by BFS/DFS (order doesn't matter to the
    /// caller) and by Best-First (which additionally scores each entry).
    async fn link_discovery(
        &self,
        result: &FetchResult,
        source_url: &Url,
        current_depth: usize,
        visited: &mut HashSet<String>,
        out_frontier: &mut Vec<FrontierEntry>,
        depths: &mut HashMap<String, usize>,
    );

    /// Runs the crawl to completion (or until cancelled / exhausted),
    /// returning every fetched result in discovery order.
    async fn arun(&mut self, seed: Url, fetcher: Arc<dyn Fetcher>) -> Result<Vec<FetchResult>>;

    /// Streaming counterpart to `arun` (§6 "Result stream"). The default
    /// drains `arun` and replays its ordered results as a `Stream`; a
    /// strategy may override this for true incremental delivery.
    async fn arun_stream(
        &mut self,
        seed: Url,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Pin<Box<dyn Stream<Item = FetchResult> + Send>>> {
        let results = self.arun(seed, fetcher).await?;
        Ok(Box::pin(tokio_stream::iter(results)))
    }

    /// Signals cancellation; idempotent, safe to call from another task.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;

    /// Releases strategy-held resources. Idempotent. The base
    /// implementations have nothing to release beyond dropping `self`, but
    /// the method exists so a caller always has a uniform teardown hook.
    fn shutdown(&self) {}
}

/// Normalizes and dedups one fetch result's admissible links against
/// `visited`, honoring `include_external` and `max_depth`. Returns the
/// normalized `(url, parent)` pairs newly added to `visited`/`depths` at
/// `current_depth + 1`; callers still owe each candidate a filter-chain
/// check before it is queued.
pub(crate) fn discover_candidates(
    result: &FetchResult,
    source_url: &Url,
    current_depth: usize,
    include_external: bool,
    max_depth: usize,
    visited: &mut HashSet<String>,
    depths: &mut HashMap<String, usize>,
) -> Vec<(Url, String)> {
    let next_depth = current_depth + 1;
    if next_depth > max_depth {
        return Vec::new();
    }

    let mut candidate_links: Vec<&crate::types::Link> = result.links.internal.iter().collect();
    if include_external {
        candidate_links.extend(result.links.external.iter());
    }

    let mut candidates = Vec::new();
    for link in candidate_links {
        let Some(normalized) = crate::url_normalize::normalize(&link.href, source_url) else {
            continue;
        };
        let key = normalized.to_string();
        if visited.contains(&key) {
            continue;
        }
        visited.insert(key.clone());
        depths.insert(key, next_depth);
        candidates.push((normalized, source_url.to_string()));
    }
    candidates
}

pub(crate) fn build_checkpoint(
    strategy_tag: crate::types::StrategyTag,
    visited: &HashSet<String>,
    frontier: Vec<FrontierEntry>,
    depths: &HashMap<String, usize>,
    pages_crawled: u64,
    dfs_seen: Option<Vec<String>>,
) -> CheckpointRecord {
    CheckpointRecord {
        strategy_tag,
        visited: visited.iter().cloned().collect(),
        frontier,
        depths: depths.clone(),
        pages_crawled,
        dfs_seen,
    }
}
