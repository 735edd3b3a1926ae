//! Weighted multi-criteria URL scoring (§4.C).
//!
//! Each scorer maps a URL to `[0.0, 1.0]` (freshness's fallback branch can
//! dip as low as 0.1, never below), then multiplies by its configured
//! `weight`. `CompositeScorer` sums (optionally averages) a sequence of
//! scorers and is what strategies hold as `url_scorer`.

use crate::types::ScorerStatistics;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// Capability trait for anything that can score a URL. A trait object
/// (rather than an enum, unlike `Filter`) so callers can plug in their own
/// scorer without a crate-level enum edit.
pub trait Scorer: Send + Sync {
    fn weight(&self) -> f64;
    fn raw_score(&self, url: &Url) -> f64;
    fn stats(&self) -> ScorerStatistics;

    /// Weighted score, recording the observation in this scorer's stats.
    fn score(&self, url: &Url) -> f64 {
        let raw = self.raw_score(url);
        let weighted = raw * self.weight();
        self.record(weighted);
        weighted
    }

    fn record(&self, weighted_score: f64);
}

macro_rules! stats_boilerplate {
    () => {
        fn stats(&self) -> ScorerStatistics {
            self.stats.lock().map(|s| *s).unwrap_or_default()
        }

        fn record(&self, weighted_score: f64) {
            if let Ok(mut stats) = self.stats.lock() {
                stats.record(weighted_score);
            }
        }
    };
}

/// Fraction of the configured keyword list occurring as a substring of the
/// (optionally lowercased) URL.
pub struct KeywordRelevanceScorer {
    keywords: Vec<String>,
    case_sensitive: bool,
    weight: f64,
    stats: Mutex<ScorerStatistics>,
}

impl KeywordRelevanceScorer {
    pub fn new(keywords: Vec<String>, weight: f64, case_sensitive: bool) -> Self {
        let keywords = if case_sensitive {
            keywords
        } else {
            keywords.into_iter().map(|k| k.to_lowercase()).collect()
        };
        Self {
            keywords,
            case_sensitive,
            weight,
            stats: Mutex::new(ScorerStatistics::default()),
        }
    }
}

impl Scorer for KeywordRelevanceScorer {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn raw_score(&self, url: &Url) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        let haystack = if self.case_sensitive {
            url.as_str().to_string()
        } else {
            url.as_str().to_lowercase()
        };
        let matches = self.keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
        if matches == 0 {
            0.0
        } else if matches == self.keywords.len() {
            1.0
        } else {
            matches as f64 / self.keywords.len() as f64
        }
    }

    stats_boilerplate!();
}

/// `1 / (1 + |d - d*|)` for observed depth `d` against `optimal_depth d*`.
pub struct PathDepthScorer {
    optimal_depth: usize,
    weight: f64,
    stats: Mutex<ScorerStatistics>,
}

const DEPTH_SCORE_LOOKUP: [f64; 4] = [1.0, 0.5, 1.0 / 3.0, 0.25];

impl PathDepthScorer {
    pub fn new(optimal_depth: usize, weight: f64) -> Self {
        Self {
            optimal_depth,
            weight,
            stats: Mutex::new(ScorerStatistics::default()),
        }
    }

    fn depth_of(url: &Url) -> usize {
        url.path().split('/').filter(|s| !s.is_empty()).count()
    }
}

impl Scorer for PathDepthScorer {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn raw_score(&self, url: &Url) -> f64 {
        let observed = Self::depth_of(url);
        let distance = observed.abs_diff(self.optimal_depth);
        match DEPTH_SCORE_LOOKUP.get(distance) {
            Some(score) => *score,
            None => 1.0 / (1.0 + distance as f64),
        }
    }

    stats_boilerplate!();
}

/// Extension lookup against a weight map; falls back to pattern→weight
/// regexes checked in descending weight order, returning on first match.
pub struct ContentTypeScorer {
    exact: HashMap<String, f64>,
    patterns: Vec<(Regex, f64)>,
    weight: f64,
    stats: Mutex<ScorerStatistics>,
}

impl ContentTypeScorer {
    pub fn new(exact: HashMap<String, f64>, mut patterns: Vec<(Regex, f64)>, weight: f64) -> Self {
        patterns.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            exact,
            patterns,
            weight,
            stats: Mutex::new(ScorerStatistics::default()),
        }
    }
}

impl Scorer for ContentTypeScorer {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn raw_score(&self, url: &Url) -> f64 {
        let path = url.path().to_lowercase();
        let ext = path.rsplit('/').next().unwrap_or("").rsplit_once('.').map(|(_, e)| e);
        if let Some(ext) = ext {
            if let Some(score) = self.exact.get(ext) {
                return *score;
            }
        }
        for (re, score) in &self.patterns {
            if re.is_match(&path) {
                return *score;
            }
        }
        0.0
    }

    stats_boilerplate!();
}

/// Extracts the latest year `y <= current_year` from the URL and maps age
/// (`current_year - y`) through a lookup table, falling back to
/// `max(0.1, 1.0 - 0.1 * age)`. No year present scores `0.5`.
pub struct FreshnessScorer {
    current_year: i32,
    weight: f64,
    year_re: Regex,
    stats: Mutex<ScorerStatistics>,
}

const FRESHNESS_SCORES: [f64; 6] = [1.0, 0.9, 0.8, 0.7, 0.6, 0.5];

impl FreshnessScorer {
    pub fn new(current_year: i32, weight: f64) -> Self {
        Self {
            current_year,
            weight,
            // YYYY optionally followed by -MM[-DD] / _MM[_DD] / /MM[/DD].
            year_re: Regex::new(r"(?:19|20)\d{2}(?:[-/_]\d{2}(?:[-/_]\d{2})?)?").unwrap(),
            stats: Mutex::new(ScorerStatistics::default()),
        }
    }

    fn extract_year(&self, url: &Url) -> Option<i32> {
        self.year_re
            .find_iter(url.as_str())
            .filter_map(|m| m.as_str()[..4].parse::<i32>().ok())
            .filter(|y| *y <= self.current_year)
            .max()
    }
}

impl Scorer for FreshnessScorer {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn raw_score(&self, url: &Url) -> f64 {
        match self.extract_year(url) {
            None => 0.5,
            Some(year) => {
                let age = (self.current_year - year).max(0) as usize;
                match FRESHNESS_SCORES.get(age) {
                    Some(score) => *score,
                    None => (1.0 - 0.1 * age as f64).max(0.1),
                }
            }
        }
    }

    stats_boilerplate!();
}

/// Exact lookup of host against a weight map; misses return
/// `default_weight`. A small top-5 cache accelerates frequent hosts.
pub struct DomainAuthorityScorer {
    weights: HashMap<String, f64>,
    default_weight: f64,
    weight: f64,
    top_cache: Mutex<Vec<(String, f64)>>,
    stats: Mutex<ScorerStatistics>,
}

const TOP_CACHE_SIZE: usize = 5;

impl DomainAuthorityScorer {
    pub fn new(weights: HashMap<String, f64>, default_weight: f64, weight: f64) -> Self {
        let mut entries: Vec<(String, f64)> = weights.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        entries.truncate(TOP_CACHE_SIZE);
        Self {
            weights,
            default_weight,
            weight,
            top_cache: Mutex::new(entries),
            stats: Mutex::new(ScorerStatistics::default()),
        }
    }
}

impl Scorer for DomainAuthorityScorer {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn raw_score(&self, url: &Url) -> f64 {
        let Some(host) = url.host_str() else {
            return self.default_weight;
        };
        if let Ok(cache) = self.top_cache.lock() {
            if let Some((_, score)) = cache.iter().find(|(h, _)| h == host) {
                return *score;
            }
        }
        *self.weights.get(host).unwrap_or(&self.default_weight)
    }

    stats_boilerplate!();
}

/// Sums (optionally averages) a sequence of scorers. Each component scorer
/// records its own statistics in addition to the composite's.
pub struct CompositeScorer {
    scorers: Vec<Box<dyn Scorer>>,
    normalize: bool,
    stats: Mutex<ScorerStatistics>,
}

impl CompositeScorer {
    pub fn new(scorers: Vec<Box<dyn Scorer>>, normalize: bool) -> Self {
        Self {
            scorers,
            normalize,
            stats: Mutex::new(ScorerStatistics::default()),
        }
    }

    pub fn score(&self, url: &Url) -> f64 {
        if self.scorers.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.scorers.iter().map(|s| s.score(url)).sum();
        let result = if self.normalize {
            sum / self.scorers.len() as f64
        } else {
            sum
        };
        if let Ok(mut stats) = self.stats.lock() {
            stats.record(result);
        }
        result
    }

    pub fn stats(&self) -> ScorerStatistics {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn keyword_relevance_fraction() {
        let s = KeywordRelevanceScorer::new(vec!["rust".into(), "async".into()], 1.0, false);
        assert_eq!(s.raw_score(&url("https://example.com/rust-async-guide")), 1.0);
        assert_eq!(s.raw_score(&url("https://example.com/rust-guide")), 0.5);
        assert_eq!(s.raw_score(&url("https://example.com/other")), 0.0);
    }

    #[test]
    fn path_depth_exact_optimal() {
        let s = PathDepthScorer::new(2, 1.0);
        assert_eq!(s.raw_score(&url("https://example.com/a/b")), 1.0);
    }

    #[test]
    fn path_depth_lookup_table_for_small_distances() {
        let s = PathDepthScorer::new(0, 1.0);
        assert_eq!(s.raw_score(&url("https://example.com/a")), 0.5);
        assert_eq!(s.raw_score(&url("https://example.com/a/b")), 1.0 / 3.0);
    }

    #[test]
    fn freshness_no_year_returns_half() {
        let s = FreshnessScorer::new(2026, 1.0);
        assert_eq!(s.raw_score(&url("https://example.com/guide")), 0.5);
    }

    #[test]
    fn freshness_picks_most_recent_year_not_exceeding_current() {
        let s = FreshnessScorer::new(2026, 1.0);
        let score = s.raw_score(&url("https://example.com/archive/2019/updated-2024/post"));
        assert_eq!(score, FRESHNESS_SCORES[2026 - 2024]);
    }

    #[test]
    fn freshness_ignores_future_years() {
        let s = FreshnessScorer::new(2026, 1.0);
        let score = s.raw_score(&url("https://example.com/2030/post-2020"));
        assert_eq!(score, FRESHNESS_SCORES[2026 - 2020]);
    }

    #[test]
    fn domain_authority_falls_back_to_default() {
        let mut weights = HashMap::new();
        weights.insert("trusted.com".to_string(), 0.9);
        let s = DomainAuthorityScorer::new(weights, 0.3, 1.0);
        assert_eq!(s.raw_score(&url("https://trusted.com/x")), 0.9);
        assert_eq!(s.raw_score(&url("https://unknown.com/x")), 0.3);
    }

    #[test]
    fn composite_sums_weighted_scores() {
        let scorers: Vec<Box<dyn Scorer>> = vec![
            Box::new(KeywordRelevanceScorer::new(vec!["rust".into()], 0.5, false)),
            Box::new(PathDepthScorer::new(1, 0.5)),
        ];
        let composite = CompositeScorer::new(scorers, false);
        let score = composite.score(&url("https://example.com/rust"));
        assert!(score > 0.0);
    }

    #[test]
    fn composite_normalizes_when_configured() {
        let scorers: Vec<Box<dyn Scorer>> = vec![
            Box::new(KeywordRelevanceScorer::new(vec!["rust".into()], 1.0, false)),
            Box::new(KeywordRelevanceScorer::new(vec!["other".into()], 1.0, false)),
        ];
        let composite = CompositeScorer::new(scorers, true);
        // one scorer matches (1.0), the other doesn't (0.0); normalized -> 0.5
        let score = composite.score(&url("https://example.com/rust"));
        assert_eq!(score, 0.5);
    }
}
