//! Breadth-first traversal (§4.G, scenario S1).
//!
//! The frontier is a FIFO queue. Because `discover_candidates` only ever
//! appends at `current_depth + 1` and entries are drained in insertion
//! order, every entry at depth `d` is drained before any entry at depth
//! `d + 1` is dispatched, satisfying invariant 1 (shallower-before-deeper).

use super::{build_checkpoint, check_should_continue, discover_candidates, CancelHandle, DeepCrawl, TraversalDeps};
use crate::config::SpiderConfig;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::types::{CheckpointRecord, FetchResult, FrontierEntry, StrategyTag};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub struct BfsStrategy {
    config: SpiderConfig,
    deps: TraversalDeps,
    cancel: CancelHandle,
    visited: HashSet<String>,
    depths: HashMap<String, usize>,
    frontier: VecDeque<FrontierEntry>,
    pages_crawled: u64,
}

impl BfsStrategy {
    pub fn new(config: SpiderConfig, deps: TraversalDeps) -> Self {
        Self {
            config,
            deps,
            cancel: CancelHandle::new(),
            visited: HashSet::new(),
            depths: HashMap::new(),
            frontier: VecDeque::new(),
            pages_crawled: 0,
        }
    }

    /// Reconstructs from a checkpoint, ignoring the seed the caller would
    /// otherwise pass to `arun` (§4.H: resume never re-seeds a non-empty
    /// frontier).
    pub fn resume_from(config: SpiderConfig, deps: TraversalDeps, record: CheckpointRecord) -> Self {
        Self {
            config,
            deps,
            cancel: CancelHandle::new(),
            visited: record.visited.into_iter().collect(),
            depths: record.depths,
            frontier: record.frontier.into_iter().collect(),
            pages_crawled: record.pages_crawled,
        }
    }

    fn checkpoint(&self) -> CheckpointRecord {
        build_checkpoint(
            StrategyTag::Bfs,
            &self.visited,
            self.frontier.iter().cloned().collect(),
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
impl DeepCrawl for BfsStrategy {
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
        for (url, parent) in candidates {
            out_frontier.push(FrontierEntry {
                url: url.to_string(),
                parent_url: Some(parent),
                depth: current_depth + 1,
                score: 0.0,
            });
        }
    }

    async fn arun(&mut self, seed: Url, fetcher: Arc<dyn Fetcher>) -> Result<Vec<FetchResult>> {
        if self.visited.is_empty() && self.frontier.is_empty() {
            let key = seed.to_string();
            self.visited.insert(key.clone());
            self.depths.insert(key.clone(), 0);
            self.frontier.push_back(FrontierEntry {
                url: key,
                parent_url: None,
                depth: 0,
                score: 0.0,
            });
        }

        let mut results = Vec::new();

        while !self.frontier.is_empty()
            && self.pages_crawled < self.config.max_pages as u64
            && !self.cancel.is_cancelled()
            && check_should_continue(&self.deps.should_continue)
        {
            let remaining_budget = self.config.max_pages as u64 - self.pages_crawled;
            let batch_len = self
                .config
                .batch_size
                .min(remaining_budget as usize)
                .min(self.frontier.len());
            let batch: Vec<FrontierEntry> = self.frontier.drain(..batch_len).collect();

            let urls: Vec<Url> = batch
                .iter()
                .filter_map(|entry| Url::parse(&entry.url).ok())
                .collect();
            let fetched = self.deps.dispatcher.dispatch(urls, fetcher.as_ref()).await;

            for (entry, raw_result) in batch.into_iter().zip(fetched.into_iter()) {
                let enriched = raw_result.with_traversal_metadata(entry.depth, entry.parent_url.as_deref(), None);

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
                            if self
                                .deps
                                .filter_chain
                                .apply(&candidate_url, fetcher.as_ref())
                                .await
                            {
                                self.frontier.push_back(candidate);
                            }
                        }
                    }
                }

                results.push(enriched);
                self.maybe_emit_checkpoint().await;
            }
        }

        if self.cancel.is_cancelled() {
            debug!(pages_crawled = self.pages_crawled, "bfs crawl cancelled");
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
