//! URL admission filter chain (§4.B).
//!
//! A filter is either a pure predicate or one that must await the fetcher's
//! head-only mode. `FilterChain::apply` evaluates filters in declaration
//! order, short-circuiting on the first synchronous rejection, then gathers
//! any trailing run of asynchronous filters concurrently before deciding.

use crate::fetcher::Fetcher;
use crate::types::FilterStatistics;
use regex::Regex;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use url::Url;

type SyncPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;
type AsyncPredicate =
    Arc<dyn Fn(String) -> futures::future::BoxFuture<'static, bool> + Send + Sync>;

/// A single admission predicate. Implemented as a tagged enum rather than a
/// trait object hierarchy: the chain needs to know, cheaply and without a
/// dynamic dispatch round-trip, whether a filter is sync or async so it can
/// batch the async run.
pub enum Filter {
    UrlPattern(UrlPatternFilter),
    Domain(DomainFilter),
    ContentType(ContentTypeFilter),
    ContentRelevance(ContentRelevanceFilter),
    Seo(SeoFilter),
    Callback(CallbackFilter),
}

impl Filter {
    fn is_async(&self) -> bool {
        match self {
            Filter::ContentRelevance(_) | Filter::Seo(_) => true,
            Filter::Callback(f) => matches!(f.predicate, CallbackPredicate::Async(_)),
            Filter::UrlPattern(_) | Filter::Domain(_) | Filter::ContentType(_) => false,
        }
    }

    fn stats(&self) -> &Mutex<FilterStatistics> {
        match self {
            Filter::UrlPattern(f) => &f.stats,
            Filter::Domain(f) => &f.stats,
            Filter::ContentType(f) => &f.stats,
            Filter::ContentRelevance(f) => &f.stats,
            Filter::Seo(f) => &f.stats,
            Filter::Callback(f) => &f.stats,
        }
    }

    fn record(&self, passed: bool) {
        if let Ok(mut stats) = self.stats().lock() {
            stats.record(passed);
        }
    }

    fn apply_sync(&self, url: &Url) -> bool {
        let decision = match self {
            Filter::UrlPattern(f) => f.matches(url) != f.reverse,
            Filter::Domain(f) => f.matches(url),
            Filter::ContentType(f) => f.matches(url),
            Filter::Callback(f) => match &f.predicate {
                CallbackPredicate::Sync(p) => {
                    catch_unwind(AssertUnwindSafe(|| p(url.as_str()))).unwrap_or(false)
                }
                CallbackPredicate::Async(_) => unreachable!("async callback routed to apply_async"),
            },
            Filter::ContentRelevance(_) | Filter::Seo(_) => {
                unreachable!("async filter routed to apply_sync")
            }
        };
        self.record(decision);
        decision
    }

    async fn apply_async(&self, url: &Url, fetcher: &dyn Fetcher) -> bool {
        let decision = match self {
            Filter::ContentRelevance(f) => f.matches(url, fetcher).await,
            Filter::Seo(f) => f.matches(url, fetcher).await,
            Filter::Callback(f) => match &f.predicate {
                CallbackPredicate::Async(p) => p(url.to_string()).await,
                CallbackPredicate::Sync(_) => unreachable!("sync callback routed to apply_async"),
            },
            _ => unreachable!("sync filter routed to apply_async"),
        };
        self.record(decision);
        decision
    }
}

/// Ordered, short-circuiting sequence of admission filters.
pub struct FilterChain {
    filters: Vec<Filter>,
    stats: Mutex<FilterStatistics>,
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            stats: Mutex::new(FilterStatistics::default()),
        }
    }

    pub fn stats(&self) -> FilterStatistics {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Evaluates every filter against `url`, short-circuiting on the first
    /// synchronous rejection. Any contiguous run of asynchronous filters
    /// that follows an all-accepting run of synchronous filters is awaited
    /// concurrently; the URL is admitted only if every filter in that batch
    /// accepts.
    pub async fn apply(&self, url: &Url, fetcher: &dyn Fetcher) -> bool {
        if let Ok(mut stats) = self.stats.lock() {
            stats.total += 1;
        }

        let mut i = 0;
        while i < self.filters.len() {
            if !self.filters[i].is_async() {
                if !self.filters[i].apply_sync(url) {
                    self.record_chain(false);
                    return false;
                }
                i += 1;
                continue;
            }

            let mut batch = Vec::new();
            while i < self.filters.len() && self.filters[i].is_async() {
                batch.push(&self.filters[i]);
                i += 1;
            }
            let results = futures::future::join_all(
                batch.iter().map(|f| f.apply_async(url, fetcher)),
            )
            .await;
            if results.iter().any(|accepted| !accepted) {
                self.record_chain(false);
                return false;
            }
        }

        self.record_chain(true);
        true
    }

    fn record_chain(&self, passed: bool) {
        if let Ok(mut stats) = self.stats.lock() {
            if passed {
                stats.passed += 1;
            } else {
                stats.rejected += 1;
            }
        }
    }
}

/// Glob-derived URL pattern filter: suffixes (`*.ext`), path prefixes
/// (`/foo/*`), domain globs (`*.host.tld`), and raw regexes. Prefix matching
/// respects path boundaries: `/api/*` matches `/api`, `/api/`, `/api/v2`,
/// and `/api?x=1`, but not `/apiv2/`.
pub struct UrlPatternFilter {
    suffixes: Vec<String>,
    prefixes: Vec<String>,
    domain_regexes: Vec<Regex>,
    regexes: Vec<Regex>,
    reverse: bool,
    stats: Mutex<FilterStatistics>,
}

impl UrlPatternFilter {
    pub fn new(patterns: &[&str], reverse: bool) -> Self {
        let mut suffixes = Vec::new();
        let mut prefixes = Vec::new();
        let mut domain_regexes = Vec::new();
        let mut regexes = Vec::new();

        for pattern in patterns {
            if let Some(stripped) = pattern.strip_prefix("/").and_then(|p| p.strip_suffix("*")) {
                prefixes.push(format!("/{}", stripped.trim_start_matches('/').trim_end_matches('/')));
            } else if let Some(rest) = pattern.strip_prefix("*.") {
                if rest.contains('.') {
                    let escaped = regex::escape(rest);
                    if let Ok(re) = Regex::new(&format!(r"(^|\.){}$", escaped)) {
                        domain_regexes.push(re);
                    }
                } else {
                    suffixes.push(format!(".{rest}"));
                }
            } else if let Ok(re) = Regex::new(pattern) {
                regexes.push(re);
            }
        }

        Self {
            suffixes,
            prefixes,
            domain_regexes,
            regexes,
            reverse,
            stats: Mutex::new(FilterStatistics::default()),
        }
    }

    fn matches(&self, url: &Url) -> bool {
        let path = url.path();
        let path_and_query = match url.query() {
            Some(q) => format!("{path}?{q}"),
            None => path.to_string(),
        };

        if self.suffixes.iter().any(|s| path.ends_with(s.as_str())) {
            return true;
        }

        if self.prefixes.iter().any(|prefix| path_boundary_match(&path_and_query, prefix)) {
            return true;
        }

        if let Some(host) = url.host_str() {
            if self.domain_regexes.iter().any(|re| re.is_match(host)) {
                return true;
            }
        }

        self.regexes.iter().any(|re| re.is_match(url.as_str()))
    }
}

/// `/api/*` matches `/api`, `/api/`, `/api/v2`, `/api?x=1`, but not
/// `/apiv2/`: the character immediately after the prefix must be absent,
/// `/`, or `?`.
fn path_boundary_match(path_and_query: &str, prefix: &str) -> bool {
    if !path_and_query.starts_with(prefix) {
        return false;
    }
    match path_and_query.as_bytes().get(prefix.len()) {
        None => true,
        Some(b'/') | Some(b'?') => true,
        _ => false,
    }
}

/// Allow/block list over hosts. A host is a subdomain of an entry if it
/// equals it or ends with `"." + entry`.
pub struct DomainFilter {
    allowed: Option<HashSet<String>>,
    blocked: HashSet<String>,
    stats: Mutex<FilterStatistics>,
}

impl DomainFilter {
    pub fn new(allowed: Option<Vec<String>>, blocked: Vec<String>) -> Self {
        Self {
            allowed: allowed.map(|v| v.into_iter().map(|s| s.to_lowercase()).collect()),
            blocked: blocked.into_iter().map(|s| s.to_lowercase()).collect(),
            stats: Mutex::new(FilterStatistics::default()),
        }
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();

        if self.blocked.iter().any(|entry| is_subdomain(&host, entry)) {
            return false;
        }

        match &self.allowed {
            Some(allowed) => allowed.iter().any(|entry| is_subdomain(&host, entry)),
            None => true,
        }
    }
}

fn is_subdomain(host: &str, entry: &str) -> bool {
    host == entry || host.ends_with(&format!(".{entry}"))
}

/// Extension-to-MIME admission. URLs without a recognizable extension are
/// admitted; the fetcher verifies the real content type later.
pub struct ContentTypeFilter {
    allowed_mimes: HashSet<String>,
    stats: Mutex<FilterStatistics>,
}

const EXTENSION_MIME_TABLE: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("php", "text/html"),
    ("asp", "text/html"),
    ("aspx", "text/html"),
    ("jsp", "text/html"),
    ("xml", "application/xml"),
    ("rss", "application/rss+xml"),
    ("atom", "application/atom+xml"),
    ("json", "application/json"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("csv", "text/csv"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("rar", "application/vnd.rar"),
    ("7z", "application/x-7z-compressed"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("bmp", "image/bmp"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("exe", "application/x-msdownload"),
];

impl ContentTypeFilter {
    pub fn new(allowed_mimes: &[&str]) -> Self {
        Self {
            allowed_mimes: allowed_mimes.iter().map(|s| s.to_string()).collect(),
            stats: Mutex::new(FilterStatistics::default()),
        }
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(ext) = extension_of(url) else {
            return true;
        };
        match EXTENSION_MIME_TABLE
            .iter()
            .find(|(candidate, _)| *candidate == ext)
        {
            Some((_, mime)) => self.allowed_mimes.contains(*mime),
            None => true,
        }
    }
}

fn extension_of(url: &Url) -> Option<String> {
    let path = url.path();
    let last_segment = path.rsplit('/').next().unwrap_or("");
    let (_, ext) = last_segment.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 6 {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Fetches only the `<head>` section via the fetcher's head-only mode and
/// scores it against a query with BM25 over a weighted pseudo-document
/// (title x3, meta description x2, meta keywords x1, other meta x1).
pub struct ContentRelevanceFilter {
    query: String,
    threshold: f64,
    stats: Mutex<FilterStatistics>,
}

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;
const BM25_AVGDL: f64 = 1000.0;

impl ContentRelevanceFilter {
    pub fn new(query: impl Into<String>, threshold: f64) -> Self {
        Self {
            query: query.into(),
            threshold,
            stats: Mutex::new(FilterStatistics::default()),
        }
    }

    async fn matches(&self, url: &Url, fetcher: &dyn Fetcher) -> bool {
        let Ok(head) = fetcher.head_only(url).await else {
            return false;
        };
        let doc = weighted_head_document(&head);
        bm25_score(&doc, &self.query) >= self.threshold
    }
}

fn weighted_head_document(head: &str) -> String {
    let mut doc = String::new();
    if let Some(title) = extract_tag_text(head, "title") {
        for _ in 0..3 {
            doc.push_str(&title);
            doc.push(' ');
        }
    }
    if let Some(desc) = extract_meta_content(head, "description") {
        for _ in 0..2 {
            doc.push_str(&desc);
            doc.push(' ');
        }
    }
    if let Some(keywords) = extract_meta_content(head, "keywords") {
        doc.push_str(&keywords);
        doc.push(' ');
    }
    doc
}

fn extract_tag_text(html: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?is)<{tag}[^>]*>(.*?)</{tag}>")).ok()?;
    re.captures(html).map(|c| c[1].trim().to_string())
}

fn extract_meta_content(html: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r#"(?is)<meta[^>]+name=["']{name}["'][^>]+content=["']([^"']*)["']"#
    ))
    .ok()?;
    re.captures(html).map(|c| c[1].trim().to_string())
}

fn bm25_score(document: &str, query: &str) -> f64 {
    let terms: Vec<String> = document
        .to_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    let doc_len = terms.len().max(1) as f64;
    let query_terms: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();

    // Single-document corpus: simplified IDF of ln(1 + 1/df) per term.
    let mut score = 0.0;
    for qt in &query_terms {
        let tf = terms.iter().filter(|t| *t == qt).count() as f64;
        if tf == 0.0 {
            continue;
        }
        let idf = (1.0f64 + 1.0 / 1.0f64).ln();
        let numerator = tf * (BM25_K1 + 1.0);
        let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / BM25_AVGDL);
        score += idf * numerator / denominator;
    }
    score
}

/// Seven-signal heuristic SEO quality score over a page's `<head>`.
pub struct SeoFilter {
    threshold: f64,
    stats: Mutex<FilterStatistics>,
}

impl SeoFilter {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            stats: Mutex::new(FilterStatistics::default()),
        }
    }

    async fn matches(&self, url: &Url, fetcher: &dyn Fetcher) -> bool {
        let Ok(head) = fetcher.head_only(url).await else {
            return false;
        };
        seo_score(&head, url) >= self.threshold
    }
}

fn seo_score(head: &str, url: &Url) -> f64 {
    let title = extract_tag_text(head, "title").unwrap_or_default();
    let description = extract_meta_content(head, "description").unwrap_or_default();

    let title_len_score = if (50..=60).contains(&title.len()) { 1.0 } else { 0.0 };
    let keyword_score = if !title.is_empty() { 1.0 } else { 0.0 };
    let desc_len_score = if (140..=160).contains(&description.len()) { 1.0 } else { 0.0 };

    let canonical_re = Regex::new(r#"(?is)<link[^>]+rel=["']canonical["'][^>]+href=["']([^"']*)["']"#).unwrap();
    let canonical_score = match canonical_re.captures(head) {
        Some(c) => {
            if &c[1] == url.as_str() {
                1.0
            } else {
                0.5
            }
        }
        None => 0.0,
    };

    let noindex_re = Regex::new(r#"(?is)<meta[^>]+name=["']robots["'][^>]+content=["'][^"']*noindex"#).unwrap();
    let robots_score = if noindex_re.is_match(head) { 0.0 } else { 1.0 };

    let jsonld_score = if head.contains("application/ld+json") { 1.0 } else { 0.0 };

    let path = url.path();
    let mut url_quality = 1.0;
    if url.as_str().len() > 80 {
        url_quality -= 0.25;
    }
    if path.chars().any(|c| c.is_ascii_digit()) {
        url_quality -= 0.25;
    }
    if url.query().is_some() {
        url_quality -= 0.25;
    }
    if path.contains('_') {
        url_quality -= 0.25;
    }
    let url_quality_score = url_quality.max(0.0);

    // Weights sum to 1.0.
    title_len_score * 0.2
        + keyword_score * 0.15
        + desc_len_score * 0.15
        + canonical_score * 0.15
        + robots_score * 0.15
        + jsonld_score * 0.1
        + url_quality_score * 0.1
}

enum CallbackPredicate {
    Sync(SyncPredicate),
    Async(AsyncPredicate),
}

/// Wraps a user-supplied predicate, sync or async. Panics (or, for a
/// fallible sync predicate, an `Err`) are caught and treated as rejection.
pub struct CallbackFilter {
    pub name: String,
    predicate: CallbackPredicate,
    stats: Mutex<FilterStatistics>,
}

impl CallbackFilter {
    pub fn sync(name: impl Into<String>, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            predicate: CallbackPredicate::Sync(Arc::new(predicate)),
            stats: Mutex::new(FilterStatistics::default()),
        }
    }

    pub fn asynchronous<F, Fut>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        Self {
            name: name.into(),
            predicate: CallbackPredicate::Async(Arc::new(move |url| Box::pin(predicate(url)))),
            stats: Mutex::new(FilterStatistics::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::NullFetcher;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn url_pattern_prefix_respects_path_boundary() {
        let f = UrlPatternFilter::new(&["/api/*"], false);
        assert!(f.matches(&url("https://example.com/api")));
        assert!(f.matches(&url("https://example.com/api/")));
        assert!(f.matches(&url("https://example.com/api/v1")));
        assert!(f.matches(&url("https://example.com/api?x=1")));
        assert!(!f.matches(&url("https://example.com/apiv2/")));
        assert!(!f.matches(&url("https://example.com/api_old/")));
    }

    #[test]
    fn url_pattern_suffix() {
        let f = UrlPatternFilter::new(&["*.pdf"], false);
        assert!(f.matches(&url("https://example.com/docs/file.pdf")));
        assert!(!f.matches(&url("https://example.com/docs/file.html")));
    }

    #[test]
    fn url_pattern_domain_glob() {
        let f = UrlPatternFilter::new(&["*.cdn.example.com"], false);
        assert!(f.matches(&url("https://assets.cdn.example.com/x")));
        assert!(!f.matches(&url("https://example.com/x")));
    }

    #[test]
    fn url_pattern_reverse_negates_via_filter_wrapper() {
        let filter = Filter::UrlPattern(UrlPatternFilter::new(&["/api/*"], true));
        assert!(!filter.apply_sync(&url("https://example.com/api")));
        assert!(filter.apply_sync(&url("https://example.com/other")));
    }

    #[test]
    fn domain_filter_subdomain_rules() {
        let f = DomainFilter::new(Some(vec!["example.com".into()]), vec!["bad.example.com".into()]);
        assert!(f.matches(&url("https://example.com/")));
        assert!(f.matches(&url("https://docs.example.com/")));
        assert!(!f.matches(&url("https://other.com/")));
        assert!(!f.matches(&url("https://bad.example.com/")));
    }

    #[test]
    fn content_type_filter_admits_no_extension() {
        let f = ContentTypeFilter::new(&["text/html"]);
        assert!(f.matches(&url("https://example.com/articles/some-post")));
    }

    #[test]
    fn content_type_filter_rejects_disallowed_extension() {
        let f = ContentTypeFilter::new(&["text/html"]);
        assert!(!f.matches(&url("https://example.com/file.pdf")));
        assert!(f.matches(&url("https://example.com/index.html")));
    }

    #[tokio::test]
    async fn callback_filter_sync_rejects_on_panic() {
        let f = CallbackFilter::sync("panics", |url| {
            if url.contains("boom") {
                panic!("simulated");
            }
            true
        });
        let filter = Filter::Callback(f);
        assert!(filter.apply_sync(&url("https://example.com/ok")));
        assert!(!filter.apply_sync(&url("https://example.com/boom")));
    }

    #[tokio::test]
    async fn callback_filter_async_variant() {
        let f = CallbackFilter::asynchronous("async-domain", |u: String| async move {
            u.contains("example.com")
        });
        let filter = Filter::Callback(f);
        let fetcher = NullFetcher;
        assert!(filter.apply_async(&url("https://example.com/x"), &fetcher).await);
        assert!(!filter.apply_async(&url("https://other.com/x"), &fetcher).await);
    }

    #[tokio::test]
    async fn chain_short_circuits_on_sync_rejection() {
        let chain = FilterChain::new(vec![
            Filter::Domain(DomainFilter::new(None, vec!["blocked.com".into()])),
        ]);
        let fetcher = NullFetcher;
        assert!(!chain.apply(&url("https://blocked.com/x"), &fetcher).await);
        let stats = chain.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn chain_accepts_when_all_filters_pass() {
        let chain = FilterChain::new(vec![
            Filter::Domain(DomainFilter::new(None, vec![])),
            Filter::ContentType(ContentTypeFilter::new(&["text/html"])),
        ]);
        let fetcher = NullFetcher;
        assert!(chain.apply(&url("https://example.com/page"), &fetcher).await);
    }
}
