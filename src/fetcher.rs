//! Fetcher adapter boundary (§4.J).
//!
//! The engine never fetches pages itself beyond robots.txt; it depends on
//! an abstract `Fetcher`, following the Hexagonal-ports idiom of
//! `riptide_types::ports::spider::SpiderEngine` (the trait lives on the
//! domain side, concrete adapters live downstream). A `reqwest`-backed
//! reference adapter is provided for convenience; a headless-browser-backed
//! adapter is the consumer's responsibility, not this crate's.

use crate::error::Result;
use crate::types::FetchResult;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Abstract fetcher the engine drives. Implementations enforce their own
/// per-fetch timeout and surface status codes; the dispatcher and rate
/// limiter layer on top of this trait, never replacing it.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Concurrently retrieves `urls`, honoring the fetcher's own
    /// connection/browser pools. Order of the returned vector is not
    /// contractual; callers that need completion order should prefer a
    /// fetcher that fetches one URL at a time under the dispatcher's own
    /// concurrency control (see `dispatcher.rs`).
    async fn fetch_many(&self, urls: &[Url]) -> Result<Vec<FetchResult>>;

    /// Fetches a single URL. The default implementation calls
    /// `fetch_many` with a single-element slice; adapters may override
    /// this for a cheaper code path.
    async fn fetch_one(&self, url: &Url) -> Result<FetchResult> {
        let mut results = self.fetch_many(std::slice::from_ref(url)).await?;
        results
            .pop()
            .ok_or_else(|| crate::error::anyhow!("fetcher returned no result for {url}"))
    }

    /// Fetches only the HTTP response head plus the parsed `<head>`
    /// section, as HTML text. Used by the content-relevance and SEO
    /// filters; never by the core traversal loop.
    async fn head_only(&self, url: &Url) -> Result<String>;
}

/// Minimal `reqwest`-backed fetcher. A convenience default; not a
/// requirement of the trait. Consumers wanting browser rendering, caching,
/// or retries beyond what `riptide-reliability`-style wrappers provide
/// should implement `Fetcher` themselves.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl ReqwestFetcher {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Result<Self> {
        let user_agent = user_agent.into();
        let client = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .timeout(timeout)
            .build()?;
        Ok(Self { client, user_agent })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch_many(&self, urls: &[Url]) -> Result<Vec<FetchResult>> {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            results.push(self.fetch_one(url).await.unwrap_or_else(|e| FetchResult {
                url: url.to_string(),
                success: false,
                status_code: None,
                html: None,
                links: crate::types::LinkSet::default(),
                error: Some(e.to_string()),
                metadata: Default::default(),
            }));
        }
        Ok(results)
    }

    async fn fetch_one(&self, url: &Url) -> Result<FetchResult> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let links = extract_links(&body, url);
        Ok(FetchResult {
            url: url.to_string(),
            success: status.is_success(),
            status_code: Some(status.as_u16()),
            html: Some(body),
            links,
            error: None,
            metadata: Default::default(),
        })
    }

    async fn head_only(&self, url: &Url) -> Result<String> {
        let body = self.fetch_one(url).await?.html.unwrap_or_default();
        Ok(extract_head_section(&body))
    }
}

fn extract_head_section(html: &str) -> String {
    let lower = html.to_lowercase();
    match (lower.find("<head"), lower.find("</head>")) {
        (Some(start), Some(end)) if end > start => html[start..end].to_string(),
        _ => html.to_string(),
    }
}

/// Very small `href="..."` scraper, sufficient for the reference adapter.
/// Real extraction (reader-mode text, markdown conversion) is explicitly
/// out of scope for this crate — see §1's non-goals.
fn extract_links(html: &str, source: &Url) -> crate::types::LinkSet {
    let re = regex::Regex::new(r#"(?is)<a\s+[^>]*href=["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap();
    let mut internal = Vec::new();
    let mut external = Vec::new();
    for caps in re.captures_iter(html) {
        let href = caps[1].to_string();
        let text = strip_tags(&caps[2]);
        let Some(resolved) = source.join(&href).ok() else {
            continue;
        };
        let link = crate::types::Link {
            href: resolved.to_string(),
            text,
            context: String::new(),
        };
        if resolved.host_str() == source.host_str() {
            internal.push(link);
        } else {
            external.push(link);
        }
    }
    crate::types::LinkSet { internal, external }
}

fn strip_tags(fragment: &str) -> String {
    let re = regex::Regex::new(r"(?is)<[^>]+>").unwrap();
    re.replace_all(fragment, "").trim().to_string()
}

/// A fetcher that fails every request. Used in tests that exercise code
/// paths which never reach the network (e.g. sync-only filter chains).
pub struct NullFetcher;

#[async_trait]
impl Fetcher for NullFetcher {
    async fn fetch_many(&self, urls: &[Url]) -> Result<Vec<FetchResult>> {
        Ok(urls
            .iter()
            .map(|u| FetchResult {
                url: u.to_string(),
                success: false,
                status_code: None,
                html: None,
                links: Default::default(),
                error: Some("NullFetcher never succeeds".into()),
                metadata: Default::default(),
            })
            .collect())
    }

    async fn head_only(&self, _url: &Url) -> Result<String> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_fetcher_always_fails() {
        let fetcher = NullFetcher;
        let url = Url::parse("https://example.com").unwrap();
        let result = fetcher.fetch_one(&url).await.unwrap();
        assert!(!result.success);
    }

    #[test]
    fn extract_links_partitions_internal_and_external() {
        let html = r#"<a href="/local">Local</a><a href="https://other.com/x">Other</a>"#;
        let source = Url::parse("https://example.com/page").unwrap();
        let links = extract_links(html, &source);
        assert_eq!(links.internal.len(), 1);
        assert_eq!(links.external.len(), 1);
        assert_eq!(links.internal[0].text, "Local");
    }

    #[test]
    fn extract_head_section_finds_head_tag() {
        let html = "<html><head><title>T</title></head><body>x</body></html>";
        let head = extract_head_section(html);
        assert!(head.contains("<title>T</title>"));
        assert!(!head.contains("<body>"));
    }
}
