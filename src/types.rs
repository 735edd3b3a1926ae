//! Shared data types: the wire/record shapes the rest of the crate passes
//! around. Kept dependency-free of `filters`/`scorers`/`strategy` so those
//! modules can all depend on `types` without a cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An outbound link discovered on a fetched page.
///
/// The engine only reads `href`; `text`/`context` are passed through
/// untouched to filters and scorers that want them (e.g. a keyword filter
/// matching on anchor text).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub context: String,
}

/// Internal vs. external link decomposition of a fetched page, as produced
/// by the external fetcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkSet {
    #[serde(default)]
    pub internal: Vec<Link>,
    #[serde(default)]
    pub external: Vec<Link>,
}

/// Result of fetching a single URL, produced by the external `Fetcher` and
/// enriched by the engine with `depth`, `parent_url`, and `score` metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub html: Option<String>,
    #[serde(default)]
    pub links: LinkSet,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl FetchResult {
    /// Attaches the depth/parent/score metadata the engine owns. Strategies
    /// call this immediately after a fetch completes, before the result is
    /// yielded to the caller.
    pub fn with_traversal_metadata(
        mut self,
        depth: usize,
        parent_url: Option<&str>,
        score: Option<f64>,
    ) -> Self {
        self.metadata
            .insert("depth".to_string(), serde_json::json!(depth));
        if let Some(parent) = parent_url {
            self.metadata
                .insert("parent_url".to_string(), serde_json::json!(parent));
        }
        if let Some(score) = score {
            self.metadata
                .insert("score".to_string(), serde_json::json!(score));
        }
        self
    }
}

/// One pending unit of work in the frontier. `score` is informational for
/// BFS/DFS and the priority key for Best-First.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub url: String,
    pub parent_url: Option<String>,
    pub depth: usize,
    pub score: f64,
}

/// Which traversal strategy produced a checkpoint, recorded so a resumed
/// crawl is reconstructed with the right strategy type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyTag {
    Bfs,
    Dfs,
    Bff,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::Bfs => "bfs",
            StrategyTag::Dfs => "dfs",
            StrategyTag::Bff => "bff",
        }
    }
}

/// JSON-safe projection of traversal state, per §4.H / §6. `dfs_seen` is
/// populated only by the DFS strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub strategy_tag: StrategyTag,
    pub visited: Vec<String>,
    pub frontier: Vec<FrontierEntry>,
    pub depths: HashMap<String, usize>,
    pub pages_crawled: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dfs_seen: Option<Vec<String>>,
}

/// Per-filter (and per-chain) pass/reject counters. Informational only;
/// exact values are not contractual (see concurrency model, §5).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FilterStatistics {
    pub total: u64,
    pub passed: u64,
    pub rejected: u64,
}

impl FilterStatistics {
    pub fn record(&mut self, passed: bool) {
        self.total += 1;
        if passed {
            self.passed += 1;
        } else {
            self.rejected += 1;
        }
    }
}

/// Running statistics for a scorer: count, sum, and observed range.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScorerStatistics {
    pub n: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ScorerStatistics {
    pub fn record(&mut self, score: f64) {
        self.n += 1;
        self.sum += score;
        self.min = Some(self.min.map_or(score, |m| m.min(score)));
        self.max = Some(self.max.map_or(score, |m| m.max(score)));
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.sum / self.n as f64
        }
    }
}
