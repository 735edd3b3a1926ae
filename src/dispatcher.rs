//! Admission-controlled concurrent fetch execution (§4.F).
//!
//! Two orthogonal admission controls gate dispatch: a counting semaphore
//! (`max_session_permit`) and a memory guard sampled via `sysinfo`, matching
//! `riptide-spider`'s use of system resource sampling for its own
//! performance tuning.

use crate::fetcher::Fetcher;
use crate::rate_limiter::{RateLimiter, ReportOutcome};
use crate::robots::RobotsCache;
use crate::types::FetchResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

/// Per-URL lifecycle events a monitor callback may observe.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Queued { url: String },
    Started { url: String },
    Completed { url: String, success: bool },
    MemorySample { used_percent: f64 },
}

pub type MonitorCallback = Arc<dyn Fn(DispatchEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_session_permit: usize,
    pub memory_threshold_percent: f64,
    pub check_interval: Duration,
    pub respect_robots: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_session_permit: 10,
            memory_threshold_percent: 70.0,
            check_interval: Duration::from_millis(500),
            respect_robots: true,
        }
    }
}

/// Schedules fetches across a batch, honoring the concurrency semaphore,
/// the memory guard, the rate limiter, and (optionally) robots admission.
pub struct Dispatcher {
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    rate_limiter: Arc<RateLimiter>,
    robots: Option<Arc<RobotsCache>>,
    user_agent: String,
    monitor: Option<MonitorCallback>,
    dispatched_count: AtomicU64,
    system: Mutex<System>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        rate_limiter: Arc<RateLimiter>,
        robots: Option<Arc<RobotsCache>>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_session_permit.max(1))),
            config,
            rate_limiter,
            robots,
            user_agent: user_agent.into(),
            monitor: None,
            dispatched_count: AtomicU64::new(0),
            system: Mutex::new(System::new()),
        }
    }

    pub fn with_monitor(mut self, monitor: MonitorCallback) -> Self {
        self.monitor = Some(monitor);
        self
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(monitor) = &self.monitor {
            monitor(event);
        }
    }

    /// Blocks (without preempting running tasks) until resident memory is
    /// back under the configured threshold.
    async fn await_memory_budget(&self) {
        loop {
            let used_percent = {
                let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
                system.refresh_memory();
                let total = system.total_memory().max(1);
                let used = system.used_memory();
                (used as f64 / total as f64) * 100.0
            };
            self.emit(DispatchEvent::MemorySample { used_percent });
            if used_percent <= self.config.memory_threshold_percent {
                return;
            }
            warn!(used_percent, threshold = self.config.memory_threshold_percent, "memory guard delaying dispatch");
            tokio::time::sleep(self.config.check_interval).await;
        }
    }

    /// Fetches a single URL and reports its status back to the rate
    /// limiter, releasing the permit on completion.
    pub async fn dispatch_fetch(
        &self,
        url: Url,
        fetcher: &dyn Fetcher,
    ) -> FetchResult {
        self.emit(DispatchEvent::Queued { url: url.to_string() });
        self.await_memory_budget().await;

        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return FetchResult {
                    url: url.to_string(),
                    success: false,
                    status_code: None,
                    html: None,
                    links: Default::default(),
                    error: Some("dispatcher semaphore closed".to_string()),
                    metadata: Default::default(),
                }
            }
        };

        if self.config.respect_robots {
            if let Some(robots) = &self.robots {
                if !robots.is_allowed(&url, &self.user_agent).await {
                    self.emit(DispatchEvent::Completed { url: url.to_string(), success: false });
                    return FetchResult {
                        url: url.to_string(),
                        success: false,
                        status_code: None,
                        html: None,
                        links: Default::default(),
                        error: Some("disallowed by robots.txt".to_string()),
                        metadata: Default::default(),
                    };
                }
            }
        }

        self.rate_limiter.acquire(&url).await;
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        self.emit(DispatchEvent::Started { url: url.to_string() });

        let result = match fetcher.fetch_one(&url).await {
            Ok(result) => result,
            Err(err) => FetchResult {
                url: url.to_string(),
                success: false,
                status_code: None,
                html: None,
                links: Default::default(),
                error: Some(err.to_string()),
                metadata: Default::default(),
            },
        };

        if let Some(status) = result.status_code {
            let outcome = self.rate_limiter.report(&url, status).await;
            if outcome == ReportOutcome::GiveUpDomain {
                debug!(url = %url, "rate limiter gave up on domain");
            }
        }

        self.emit(DispatchEvent::Completed { url: url.to_string(), success: result.success });
        result
    }

    /// Dispatches a full batch by fetching each URL individually (so
    /// per-URL robots/rate-limit/monitor events fire correctly), returning
    /// results as they complete.
    pub async fn dispatch(&self, urls: Vec<Url>, fetcher: &dyn Fetcher) -> Vec<FetchResult> {
        let futures = urls.into_iter().map(|url| self.dispatch_fetch(url, fetcher));
        futures::future::join_all(futures).await
    }

    pub fn dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }
}
