//! Depth-first traversal (§4.G, scenario S3).
//!
//! The frontier is a LIFO stack; children are pushed in reverse discovery
//! order so the *first* discovered child is popped (and therefore
//! dispatched) next, matching `dfs_strategy.py`'s traversal order. DFS
//! maintains its own `dfs_seen` set rather than reusing `visited` for
//! expansion bookkeeping, because a URL can be present in `visited` (seen as
//! a candidate) before it is actually expanded — `dfs_seen` tracks expansion,
//! `visited` tracks discovery, and only the former round-trips through a
//! checkpoint as `dfs_seen`.

use super::{build_checkpoint, check_should_continue, discover_candidates, CancelHandle, DeepCrawl, TraversalDeps};
use crate::config::SpiderConfig;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::types::{CheckpointRecord, FetchResult, FrontierEntry, StrategyTag};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub struct DfsStrategy {
    config: SpiderConfig,
    deps: TraversalDeps,
    cancel: CancelHandle,
    visited: HashSet<String>,
    depths: HashMap<String, usize>,
    stack: Vec<FrontierEntry>,
    dfs_seen: HashSet<String>,
    pages_crawled: u64,
}

impl DfsStrategy {
    pub fn new(config: SpiderConfig, deps: TraversalDeps) -> Self {
        Self {
            config,
            deps,
            cancel: CancelHandle::new(),
            visited: HashSet::new(),
            depths: HashMap::new(),
            stack: Vec::new(),
            dfs_seen: HashSet::new(),
            pages_crawled: 0,
        }
    }

    pub fn resume_from(config: SpiderConfig, deps: TraversalDeps, record: CheckpointRecord) -> Self {
        Self {
            config,
            deps,
            cancel: CancelHandle::new(),
            visited: record.visited.into_iter().collect(),
            depths: record.depths,
            stack: record.frontier,
            dfs_seen: record.dfs_seen.map(|v| v.into_iter().collect()).unwrap_or_default(),
            pages_crawled: record.pages_crawled,
        }
    }

    fn checkpoint(&self) -> CheckpointRecord {
        build_checkpoint(
            StrategyTag::Dfs,
            &self.visited,
            self.stack.clone(),
            &self.depths,
            self.pages_crawled,
            Some(self.dfs_seen.iter().cloned().collect()),
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
impl DeepCrawl for DfsStrategy {
    async fn link_discovery(
        &self,
        result: &FetchResult,
        source_url: &Url,
        current_depth: usize,
        visited: &mut HashSet<String>,
        out_frontier: &mut Vec<FrontierEntry>,
        depths: &mut HashMap<String, usize>,
    ) {
        let mut candidates = discover_candidates(
            result,
            source_url,
            current_depth,
            self.config.include_external,
            self.config.max_depth,
            visited,
            depths,
        );
        let remaining_budget = self.config.max_pages.saturating_sub(self.pages_crawled as usize);
        if candidates.len() > remaining_budget {
            // No scorer: truncate in discovery order rather than by top-K score.
            candidates.truncate(remaining_budget);
        }
        // Pushed in reverse so the stack pops the first-discovered child first.
        for (url, parent) in candidates.into_iter().rev() {
            out_frontier.push(FrontierEntry {
                url: url.to_string(),
                parent_url: Some(parent),
                depth: current_depth + 1,
                score: 0.0,
            });
        }
    }

    async fn arun(&mut self, seed: Url, fetcher: Arc<dyn Fetcher>) -> Result<Vec<FetchResult>> {
        if self.visited.is_empty() && self.stack.is_empty() {
            let key = seed.to_string();
            self.visited.insert(key.clone());
            self.depths.insert(key.clone(), 0);
            self.stack.push(FrontierEntry {
                url: key,
                parent_url: None,
                depth: 0,
                score: 0.0,
            });
        }

        let mut results = Vec::new();

        while let Some(entry) = self.stack.last().cloned() {
            if self.pages_crawled >= self.config.max_pages as u64
                || self.cancel.is_cancelled()
                || !check_should_continue(&self.deps.should_continue)
            {
                break;
            }
            self.stack.pop();

            let Ok(url) = Url::parse(&entry.url) else {
                continue;
            };
            if self.dfs_seen.contains(&entry.url) {
                // Already expanded via a different path; DFS never re-expands.
                continue;
            }
            self.dfs_seen.insert(entry.url.clone());

            let raw_result = self.deps.dispatcher.dispatch_fetch(url.clone(), fetcher.as_ref()).await;
            let enriched = raw_result.with_traversal_metadata(entry.depth, entry.parent_url.as_deref(), None);

            if enriched.success {
                self.pages_crawled += 1;
                let mut children = Vec::new();
                let mut visited = std::mem::take(&mut self.visited);
                let mut depths = std::mem::take(&mut self.depths);
                self.link_discovery(&enriched, &url, entry.depth, &mut visited, &mut children, &mut depths)
                    .await;
                self.visited = visited;
                self.depths = depths;
                for candidate in children {
                    let Ok(candidate_url) = Url::parse(&candidate.url) else {
                        continue;
                    };
                    if self.deps.filter_chain.apply(&candidate_url, fetcher.as_ref()).await {
                        self.stack.push(candidate);
                    }
                }
            }

            results.push(enriched);
            self.maybe_emit_checkpoint().await;
        }

        if self.cancel.is_cancelled() {
            debug!(pages_crawled = self.pages_crawled, "dfs crawl cancelled");
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
    use crate::types::LinkSet;

    struct FakeFetcher {
        pages: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch_many(&self, urls: &[Url]) -> Result<Vec<FetchResult>> {
            let mut out = Vec::new();
            for url in urls {
                out.push(self.fetch_one(url).await.unwrap());
            }
            Ok(out)
        }

        async fn fetch_one(&self, url: &Url) -> Result<FetchResult> {
            let links = self
                .pages
                .get(url.as_str())
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|href| crate::types::Link { href, text: String::new(), context: String::new() })
                .collect();
            Ok(FetchResult {
                url: url.to_string(),
                success: true,
                status_code: Some(200),
                html: Some(String::new()),
                links: LinkSet { internal: links, external: Vec::new() },
                error: None,
                metadata: Default::default(),
            })
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
    async fn dfs_follows_first_child_before_siblings() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/".to_string(),
            vec!["https://example.com/a".into(), "https://example.com/b".into()],
        );
        pages.insert("https://example.com/a".to_string(), vec!["https://example.com/a1".into()]);
        let fetcher: Arc<dyn Fetcher> = Arc::new(FakeFetcher { pages });

        let config = SpiderConfig::default().with_max_depth(3).with_max_pages(10);
        let mut strategy = DfsStrategy::new(config, make_deps());
        let results = strategy
            .arun(Url::parse("https://example.com/").unwrap(), fetcher)
            .await
            .unwrap();

        let urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        let pos_a = urls.iter().position(|u| *u == "https://example.com/a").unwrap();
        let pos_a1 = urls.iter().position(|u| *u == "https://example.com/a1").unwrap();
        let pos_b = urls.iter().position(|u| *u == "https://example.com/b").unwrap();
        assert!(pos_a1 < pos_b, "a1 (child of a) should be visited before sibling b");
        assert!(pos_a < pos_a1);
    }

    struct FlakyFetcher {
        fail: HashSet<String>,
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn fetch_many(&self, urls: &[Url]) -> Result<Vec<FetchResult>> {
            let mut out = Vec::new();
            for url in urls {
                out.push(self.fetch_one(url).await.unwrap());
            }
            Ok(out)
        }

        async fn fetch_one(&self, url: &Url) -> Result<FetchResult> {
            let failed = self.fail.contains(url.as_str());
            Ok(FetchResult {
                url: url.to_string(),
                success: !failed,
                status_code: Some(if failed { 500 } else { 200 }),
                html: Some(String::new()),
                links: LinkSet { internal: Vec::new(), external: Vec::new() },
                error: if failed { Some("fetch failed".to_string()) } else { None },
                metadata: Default::default(),
            })
        }

        async fn head_only(&self, _url: &Url) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn dfs_failed_fetch_does_not_count_toward_max_pages() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(FlakyFetcher {
            fail: HashSet::from(["https://example.com/".to_string()]),
        });

        let config = SpiderConfig::default().with_max_pages(1);
        let mut strategy = DfsStrategy::new(config, make_deps());
        let results = strategy
            .arun(Url::parse("https://example.com/").unwrap(), fetcher)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(strategy.pages_crawled, 0, "a failed fetch must not consume the max_pages budget");
    }

    #[tokio::test]
    async fn dfs_discovery_truncates_to_remaining_budget() {
        let links: Vec<_> = (0..5)
            .map(|i| crate::types::Link {
                href: format!("https://example.com/page{i}"),
                text: String::new(),
                context: String::new(),
            })
            .collect();
        let result = FetchResult {
            url: "https://example.com/".to_string(),
            success: true,
            status_code: Some(200),
            html: Some(String::new()),
            links: LinkSet { internal: links, external: Vec::new() },
            error: None,
            metadata: Default::default(),
        };

        let config = SpiderConfig::default().with_max_depth(2).with_max_pages(3);
        let mut strategy = DfsStrategy::new(config, make_deps());
        strategy.pages_crawled = 1;

        let mut out_frontier = Vec::new();
        let mut visited = std::mem::take(&mut strategy.visited);
        let mut depths = std::mem::take(&mut strategy.depths);
        strategy
            .link_discovery(&result, &Url::parse("https://example.com/").unwrap(), 0, &mut visited, &mut out_frontier, &mut depths)
            .await;

        assert_eq!(out_frontier.len(), 2, "discovery must truncate to the remaining page budget, not queue all 5");
    }

    #[tokio::test]
    async fn dfs_resume_restores_stack_and_dfs_seen() {
        let record = CheckpointRecord {
            strategy_tag: StrategyTag::Dfs,
            visited: vec!["https://example.com/".to_string()],
            frontier: vec![FrontierEntry {
                url: "https://example.com/a".to_string(),
                parent_url: Some("https://example.com/".to_string()),
                depth: 1,
                score: 0.0,
            }],
            depths: HashMap::from([("https://example.com/".to_string(), 0)]),
            pages_crawled: 1,
            dfs_seen: Some(vec!["https://example.com/".to_string()]),
        };
        let strategy = DfsStrategy::resume_from(SpiderConfig::default(), make_deps(), record);
        assert_eq!(strategy.stack.len(), 1);
        assert!(strategy.dfs_seen.contains("https://example.com/"));
    }
}
