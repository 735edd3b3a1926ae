//! Per-origin robots.txt cache (§4.D).
//!
//! Lookups are lock-free reads against a `dashmap`; a miss takes a
//! per-origin async mutex to serialize the fetch-and-parse, matching the
//! double-checked-locking idiom `riptide-fetch::fetch::PerHostFetchEngine`
//! uses for its per-host client map.

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
struct RobotsRecord {
    body: Option<String>,
    crawl_delay: Option<f64>,
    fetched_at: Instant,
    ttl: Duration,
}

impl RobotsRecord {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > self.ttl
    }
}

/// Per-origin fetch, parse, and memoization of robots.txt.
pub struct RobotsCache {
    records: DashMap<String, RobotsRecord>,
    origin_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    client: reqwest::Client,
    positive_ttl: Duration,
    negative_ttl: Duration,
    fetch_timeout: Duration,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            records: DashMap::new(),
            origin_locks: DashMap::new(),
            client,
            positive_ttl: Duration::from_secs(3600),
            negative_ttl: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_ttls(mut self, positive: Duration, negative: Duration) -> Self {
        self.positive_ttl = positive;
        self.negative_ttl = negative;
        self
    }

    fn origin_of(url: &Url) -> Option<String> {
        let scheme = url.scheme();
        let host = url.host_str()?;
        match url.port() {
            Some(port) => Some(format!("{scheme}://{host}:{port}")),
            None => Some(format!("{scheme}://{host}")),
        }
    }

    async fn record_for(&self, url: &Url) -> Option<RobotsRecord> {
        let origin = Self::origin_of(url)?;

        if let Some(record) = self.records.get(&origin) {
            if !record.is_expired() {
                return Some(record.clone());
            }
        }

        let lock = self
            .origin_locks
            .entry(origin.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-check after acquiring the lock: another task may have already
        // populated the record while we waited.
        if let Some(record) = self.records.get(&origin) {
            if !record.is_expired() {
                return Some(record.clone());
            }
        }

        let robots_url = format!("{origin}/robots.txt");
        let record = match self
            .client
            .get(&robots_url)
            .timeout(self.fetch_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                let body = response.text().await.unwrap_or_default();
                let crawl_delay = parse_crawl_delay(&body);
                debug!(origin = %origin, "fetched robots.txt");
                RobotsRecord {
                    body: Some(body),
                    crawl_delay,
                    fetched_at: Instant::now(),
                    ttl: self.positive_ttl,
                }
            }
            Ok(response) => {
                debug!(origin = %origin, status = %response.status(), "robots.txt not found, default-allow");
                RobotsRecord {
                    body: None,
                    crawl_delay: None,
                    fetched_at: Instant::now(),
                    ttl: self.negative_ttl,
                }
            }
            Err(err) => {
                warn!(origin = %origin, error = %err, "robots.txt fetch failed, default-allow");
                RobotsRecord {
                    body: None,
                    crawl_delay: None,
                    fetched_at: Instant::now(),
                    ttl: self.negative_ttl,
                }
            }
        };

        self.records.insert(origin, record.clone());
        Some(record)
    }

    /// Whether `user_agent` may fetch `url` per the origin's robots.txt.
    /// Defaults to allow when the record is absent, unparsable, or the
    /// fetch previously failed.
    pub async fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        let Some(record) = self.record_for(url).await else {
            return true;
        };
        let Some(body) = &record.body else {
            return true;
        };
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(body, user_agent, url.as_str())
    }

    /// `Crawl-delay` directive for the origin, if any.
    pub async fn crawl_delay(&self, url: &Url, _user_agent: &str) -> Option<f64> {
        self.record_for(url).await.and_then(|r| r.crawl_delay)
    }
}

/// `robotstxt` exposes allow/deny matching but not `Crawl-delay`; parse it
/// ourselves from the raw body (case-insensitive directive name).
fn parse_crawl_delay(body: &str) -> Option<f64> {
    for line in body.lines() {
        let line = line.trim();
        if let Some(rest) = line
            .to_lowercase()
            .strip_prefix("crawl-delay:")
            .map(|_| line.splitn(2, ':').nth(1).unwrap_or("").trim())
        {
            if let Ok(value) = rest.parse::<f64>() {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_crawl_delay_directive() {
        let body = "User-agent: *\nCrawl-delay: 5\nDisallow: /private/\n";
        assert_eq!(parse_crawl_delay(body), Some(5.0));
    }

    #[test]
    fn missing_crawl_delay_returns_none() {
        let body = "User-agent: *\nDisallow: /private/\n";
        assert_eq!(parse_crawl_delay(body), None);
    }

    #[tokio::test]
    async fn fetch_failure_defaults_to_allow() {
        let cache = RobotsCache::new(reqwest::Client::new());
        let url = Url::parse("http://127.0.0.1:1/page").unwrap();
        assert!(cache.is_allowed(&url, "test-bot").await);
    }

    #[tokio::test]
    async fn honors_disallow_directive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "User-agent: *\nDisallow: /private/\n",
            ))
            .mount(&server)
            .await;

        let cache = RobotsCache::new(reqwest::Client::new());
        let allowed = Url::parse(&format!("{}/public/page", server.uri())).unwrap();
        let disallowed = Url::parse(&format!("{}/private/page", server.uri())).unwrap();

        assert!(cache.is_allowed(&allowed, "test-bot").await);
        assert!(!cache.is_allowed(&disallowed, "test-bot").await);
    }

    #[tokio::test]
    async fn caches_crawl_delay_per_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "User-agent: *\nCrawl-delay: 3\n",
            ))
            .mount(&server)
            .await;

        let cache = RobotsCache::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        assert_eq!(cache.crawl_delay(&url, "test-bot").await, Some(3.0));
        // second call should hit the cache, not re-fetch.
        assert_eq!(cache.crawl_delay(&url, "test-bot").await, Some(3.0));
    }
}
