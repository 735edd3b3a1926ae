//! Best-first traversal (§4.G, invariant 6, scenario S2).
//!
//! The frontier is a max-heap keyed on `(score, insertion_sequence)`: ties
//! on score are broken by discovery order so the heap gives a deterministic
//! total order even though `f64` has none on its own (NaN scores are never
//! produced by `CompositeScorer`, but the sequence tiebreak makes the
//! ordering well-defined regardless). Every accepted link is kept — there is
//! no top-K truncation of the frontier (§9 open question).

use super::{build_checkpoint, check_should_continue, discover_candidates, CancelHandle, DeepCrawl, TraversalDeps};
use crate::config::SpiderConfig;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::scorers::CompositeScorer;
use crate::types::{CheckpointRecord, FetchResult, FrontierEntry, StrategyTag};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
struct HeapEntry {
    entry: FrontierEntry,
    sequence: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry.score == other.entry.score && self.sequence == other.sequence
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .score
            .partial_cmp(&other.entry.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct BestFirstStrategy {
    config: SpiderConfig,
    deps: TraversalDeps,
    scorer: Arc<CompositeScorer>,
    cancel: CancelHandle,
    visited: HashSet<String>,
    depths: HashMap<String, usize>,
    heap: BinaryHeap<HeapEntry>,
    next_sequence: u64,
    pages_crawled: u64,
}

impl BestFirstStrategy {
    pub fn new(config: SpiderConfig, deps: TraversalDeps, scorer: Arc<CompositeScorer>) -> Self {
        Self {
            config,
            deps,
            scorer,
            cancel: CancelHandle::new(),
            visited: HashSet::new(),
            depths: HashMap::new(),
            heap: BinaryHeap::new(),
            next_sequence: 0,
            pages_crawled: 0,
        }
    }

    pub fn resume_from(config: SpiderConfig, deps: TraversalDeps, scorer: Arc<CompositeScorer>, record: CheckpointRecord) -> Self {
        let mut heap = BinaryHeap::new();
        let mut next_sequence = 0;
        for entry in record.frontier {
            heap.push(HeapEntry { entry, sequence: next_sequence });
            next_sequence += 1;
        }
        Self {
            config,
            deps,
            scorer,
            cancel: CancelHandle::new(),
            visited: record.visited.into_iter().collect(),
            depths: record.depths,
            heap,
            next_sequence,
            pages_crawled: record.pages_crawled,
        }
    }

    fn push(&mut self, entry: FrontierEntry) {
        self.heap.push(HeapEntry { entry, sequence: self.next_sequence });
        self.next_sequence += 1;
    }

    fn checkpoint(&self) -> CheckpointRecord {
        build_checkpoint(
            StrategyTag::Bff,
            &self.visited,
            self.heap.iter().map(|h| h.entry.clone()).collect(),
            &self.depths,
            self.pages_crawled,
            None,
        )
    }

    async fn maybe_emit_checkpoint(&self) {
        if self.pages_crawled % self.config.checkpoint_interval != 0 {
            return;
        }
        let record = self.checkpoint();
        if let Some(callback) = &self.deps.on_state_change {
            callback(record.clone());
        }
        if let Some(sink) = &self.deps.checkpoint_sink {
            if let Err(err) = sink.save(&record).await {
                debug!(error = %err, "checkpoint save failed");
            }
        }
    }
}

#[async_trait]
impl DeepCrawl for BestFirstStrategy {
    async fn link_discovery(
        &self,
        result: &FetchResult,
        source_url: &Url,
        current_depth: usize,
        visited: &mut HashSet<String>,
        out_frontier: &mut Vec<FrontierEntry>,
        depths: &mut HashMap<String, usize>,
    ) {
        let candidates = discover_candidates(
            result,
            source_url,
            current_depth,
            self.config.include_external,
            self.config.max_depth,
            visited,
            depths,
        );

        let mut scored: Vec<(String, String, f64)> = candidates
            .into_iter()
            .filter_map(|(url, parent)| {
                let score = self.scorer.score(&url);
                (score >= self.config.score_threshold).then(|| (url.to_string(), parent, score))
            })
            .collect();

        let remaining_budget = self.config.max_pages.saturating_sub(self.pages_crawled as usize);
        if scored.len() > remaining_budget {
            // A scorer is configured: keep only the top-K by score (stable
            // sort preserves discovery order as the tiebreak).
            scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(remaining_budget);
        }

        for (url, parent, score) in scored {
            out_frontier.push(FrontierEntry { url, parent_url: Some(parent), depth: current_depth + 1, score });
        }
    }

    async fn arun(&mut self, seed: Url, fetcher: Arc<dyn Fetcher>) -> Result<Vec<FetchResult>> {
        if self.visited.is_empty() && self.heap.is_empty() {
            let key = seed.to_string();
            self.visited.insert(key.clone());
            self.depths.insert(key.clone(), 0);
            self.push(FrontierEntry { url: key, parent_url: None, depth: 0, score: f64::INFINITY });
        }

        let mut results = Vec::new();

        while !self.heap.is_empty()
            && self.pages_crawled < self.config.max_pages as u64
            && !self.cancel.is_cancelled()
            && check_should_continue(&self.deps.should_continue)
        {
            let remaining_budget = (self.config.max_pages as u64 - self.pages_crawled) as usize;
            let batch_len = self.config.batch_size.min(remaining_budget).min(self.heap.len());
            let mut batch = Vec::with_capacity(batch_len);
            for _ in 0..batch_len {
                if let Some(top) = self.heap.pop() {
                    batch.push(top.entry);
                }
            }

            let urls: Vec<Url> = batch.iter().filter_map(|entry| Url::parse(&entry.url).ok()).collect();
            let fetched = self.deps.dispatcher.dispatch(urls, fetcher.as_ref()).await;

            for (entry, raw_result) in batch.into_iter().zip(fetched.into_iter()) {
                let enriched = raw_result.with_traversal_metadata(entry.depth, entry.parent_url.as_deref(), Some(entry.score));

                if enriched.success {
                    self.pages_crawled += 1;
                    if let Ok(source_url) = Url::parse(&enriched.url) {
                        let mut new_frontier = Vec::new();
                        let mut visited = std::mem::take(&mut self.visited);
                        let mut depths = std::mem::take(&mut self.depths);
                        self.link_discovery(&enriched, &source_url, entry.depth, &mut visited, &mut new_frontier, &mut depths)
                            .await;
                        self.visited = visited;
                        self.depths = depths;
                        for candidate in new_frontier {
                            let Ok(candidate_url) = Url::parse(&candidate.url) else {
                                continue;
                            };
                            if self.deps.filter_chain.apply(&candidate_url, fetcher.as_ref()).await {
                                self.push(candidate);
                            }
                        }
                    }
                }

                results.push(enriched);
                self.maybe_emit_checkpoint().await;
            }
        }

        if self.cancel.is_cancelled() {
            debug!(pages_crawled = self.pages_crawled, "best-first crawl cancelled");
        }

        Ok(results)
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::filters::FilterChain;
    use crate::rate_limiter::RateLimiter;
    use crate::scorers::{KeywordRelevanceScorer, Scorer};
    use crate::types::LinkSet;

    struct FakeFetcher {
        pages: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch_many(&self, urls: &[Url]) -> Result<Vec<FetchResult>> {
            let mut out = Vec::new();
            for url in urls {
                let links = self
                    .pages
                    .get(url.as_str())
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|href| crate::types::Link { href, text: String::new(), context: String::new() })
                    .collect();
                out.push(FetchResult {
                    url: url.to_string(),
                    success: true,
                    status_code: Some(200),
                    html: Some(String::new()),
                    links: LinkSet { internal: links, external: Vec::new() },
                    error: None,
                    metadata: Default::default(),
                });
            }
            Ok(out)
        }

        async fn head_only(&self, _url: &Url) -> Result<String> {
            Ok(String::new())
        }
    }

    fn make_deps() -> TraversalDeps {
        let rate_limiter = Arc::new(RateLimiter::new(Default::default(), None, "test-bot"));
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig { respect_robots: false, ..Default::default() },
            rate_limiter,
            None,
            "test-bot",
        ));
        TraversalDeps::new(Arc::new(FilterChain::default()), dispatcher)
    }

    #[tokio::test]
    async fn best_first_prioritizes_higher_scoring_link() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/".to_string(),
            vec!["https://example.com/rust-guide".into(), "https://example.com/other".into()],
        );
        let fetcher: Arc<dyn Fetcher> = Arc::new(FakeFetcher { pages });

        let scorers: Vec<Box<dyn Scorer>> = vec![Box::new(KeywordRelevanceScorer::new(vec!["rust".into()], 1.0, false))];
        let scorer = Arc::new(CompositeScorer::new(scorers, false));
        let config = SpiderConfig::default().with_max_depth(2).with_max_pages(10).with_batch_size(1);
        let mut strategy = BestFirstStrategy::new(config, make_deps(), scorer);
        let results = strategy
            .arun(Url::parse("https://example.com/").unwrap(), fetcher)
            .await
            .unwrap();

        let urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        let pos_rust = urls.iter().position(|u| *u == "https://example.com/rust-guide").unwrap();
        let pos_other = urls.iter().position(|u| *u == "https://example.com/other").unwrap();
        assert!(pos_rust < pos_other);
    }

    #[tokio::test]
    async fn best_first_keeps_all_accepted_links_without_top_k_truncation() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/".to_string(),
            (0..20).map(|i| format!("https://example.com/page{i}")).collect(),
        );
        let fetcher: Arc<dyn Fetcher> = Arc::new(FakeFetcher { pages });

        let scorer = Arc::new(CompositeScorer::new(Vec::new(), false));
        let config = SpiderConfig::default().with_max_depth(2).with_max_pages(100).with_batch_size(5);
        let mut strategy = BestFirstStrategy::new(config, make_deps(), scorer);
        let results = strategy
            .arun(Url::parse("https://example.com/").unwrap(), fetcher)
            .await
            .unwrap();
        assert_eq!(results.len(), 21);
    }

    struct FlakyFetcher {
        fail: HashSet<String>,
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn fetch_many(&self, urls: &[Url]) -> Result<Vec<FetchResult>> {
            let mut out = Vec::new();
            for url in urls {
                let failed = self.fail.contains(url.as_str());
                out.push(FetchResult {
                    url: url.to_string(),
                    success: !failed,
                    status_code: Some(if failed { 500 } else { 200 }),
                    html: Some(String::new()),
                    links: LinkSet { internal: Vec::new(), external: Vec::new() },
                    error: if failed { Some("fetch failed".to_string()) } else { None },
                    metadata: Default::default(),
                });
            }
            Ok(out)
        }

        async fn head_only(&self, _url: &Url) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn best_first_failed_fetch_does_not_count_toward_max_pages() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(FlakyFetcher {
            fail: HashSet::from(["https://example.com/".to_string()]),
        });

        let scorer = Arc::new(CompositeScorer::new(Vec::new(), false));
        let config = SpiderConfig::default().with_max_pages(1);
        let mut strategy = BestFirstStrategy::new(config, make_deps(), scorer);
        let results = strategy
            .arun(Url::parse("https://example.com/").unwrap(), fetcher)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(strategy.pages_crawled, 0, "a failed fetch must not consume the max_pages budget");
    }

    #[tokio::test]
    async fn best_first_discovery_truncates_to_top_k_by_score_when_over_budget() {
        let links: Vec<_> = vec![
            crate::types::Link { href: "https://example.com/rust-guide".into(), text: String::new(), context: String::new() },
            crate::types::Link { href: "https://example.com/rust-book".into(), text: String::new(), context: String::new() },
            crate::types::Link { href: "https://example.com/other".into(), text: String::new(), context: String::new() },
        ];
        let result = FetchResult {
            url: "https://example.com/".to_string(),
            success: true,
            status_code: Some(200),
            html: Some(String::new()),
            links: LinkSet { internal: links, external: Vec::new() },
            error: None,
            metadata: Default::default(),
        };

        let scorers: Vec<Box<dyn Scorer>> = vec![Box::new(KeywordRelevanceScorer::new(vec!["rust".into()], 1.0, false))];
        let scorer = Arc::new(CompositeScorer::new(scorers, false));
        let config = SpiderConfig::default().with_max_depth(2).with_max_pages(3);
        let mut strategy = BestFirstStrategy::new(config, make_deps(), scorer);
        strategy.pages_crawled = 1; // only 2 pages remain in the budget

        let mut out_frontier = Vec::new();
        let mut visited = std::mem::take(&mut strategy.visited);
        let mut depths = std::mem::take(&mut strategy.depths);
        strategy
            .link_discovery(&result, &Url::parse("https://example.com/").unwrap(), 0, &mut visited, &mut out_frontier, &mut depths)
            .await;

        assert_eq!(out_frontier.len(), 2, "over-budget discovery must truncate to the remaining page budget");
        assert!(
            out_frontier.iter().all(|e| e.url.contains("rust")),
            "truncation must keep the highest-scoring links, not an arbitrary subset"
        );
    }
}
