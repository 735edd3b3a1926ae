//! Per-domain politeness delay and backoff (§4.E).
//!
//! `DomainState` mutations are serialized with a per-domain
//! `tokio::sync::Mutex`, held behind a `dashmap::DashMap` the way
//! `riptide-fetch::fetch`'s per-host rate limiting keys its state off the
//! request host.

use crate::robots::RobotsCache;
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use url::Url;

/// Bookkeeping for one origin's politeness delay.
#[derive(Debug, Clone)]
pub struct DomainState {
    pub last_request_at: Option<Instant>,
    pub current_delay_sec: f64,
    pub fail_count: u32,
    pub crawl_delay_sec: Option<f64>,
}

impl Default for DomainState {
    fn default() -> Self {
        Self {
            last_request_at: None,
            current_delay_sec: 0.0,
            fail_count: 0,
            crawl_delay_sec: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub base_delay_lo: f64,
    pub base_delay_hi: f64,
    pub max_delay: f64,
    pub max_retries: u32,
    pub respect_crawl_delay: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_lo: 1.0,
            base_delay_hi: 3.0,
            max_delay: 60.0,
            max_retries: 3,
            respect_crawl_delay: false,
        }
    }
}

/// Outcome of `report`: whether the caller should keep retrying this
/// domain or give up on it entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Continue,
    GiveUpDomain,
}

const DEFAULT_RATE_LIMIT_CODES: [u16; 2] = [429, 503];

/// Per-domain exponential-backoff rate limiter.
pub struct RateLimiter {
    states: DashMap<String, Arc<AsyncMutex<DomainState>>>,
    config: RateLimitConfig,
    rate_limit_codes: HashSet<u16>,
    robots: Option<Arc<RobotsCache>>,
    user_agent: String,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, robots: Option<Arc<RobotsCache>>, user_agent: impl Into<String>) -> Self {
        Self {
            states: DashMap::new(),
            config,
            rate_limit_codes: DEFAULT_RATE_LIMIT_CODES.into_iter().collect(),
            robots,
            user_agent: user_agent.into(),
        }
    }

    pub fn with_rate_limit_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.rate_limit_codes = codes.into_iter().collect();
        self
    }

    fn domain_of(url: &Url) -> String {
        url.host_str().unwrap_or_default().to_string()
    }

    fn state_for(&self, domain: &str) -> Arc<AsyncMutex<DomainState>> {
        self.states
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(DomainState::default())))
            .clone()
    }

    /// Computes and performs the required sleep before a request to
    /// `url`'s domain may proceed, per §4.E steps 1-3.
    pub async fn acquire(&self, url: &Url) {
        let domain = Self::domain_of(url);
        let state_lock = self.state_for(&domain);
        let mut state = state_lock.lock().await;

        let effective_delay = if self.config.respect_crawl_delay {
            match &self.robots {
                Some(robots) => robots.crawl_delay(url, &self.user_agent).await.unwrap_or(0.0),
                None => 0.0,
            }
        } else {
            0.0
        };
        state.crawl_delay_sec = if effective_delay > 0.0 { Some(effective_delay) } else { None };

        match state.last_request_at {
            None => {
                let base = uniform(self.config.base_delay_lo, self.config.base_delay_hi);
                state.current_delay_sec = base.max(effective_delay);
                state.last_request_at = Some(Instant::now());
            }
            Some(last) => {
                let due = last + Duration::from_secs_f64(state.current_delay_sec.max(0.0));
                let now = Instant::now();
                if due > now {
                    let wait = due - now;
                    debug!(domain = %domain, wait_ms = wait.as_millis(), "rate limiter sleeping");
                    drop(state);
                    tokio::time::sleep(wait).await;
                    state = state_lock.lock().await;
                }
                state.last_request_at = Some(Instant::now());
            }
        }
    }

    /// Updates the domain's delay after a response, per §4.E's
    /// exponential-backoff-then-decay policy.
    pub async fn report(&self, url: &Url, status_code: u16) -> ReportOutcome {
        let domain = Self::domain_of(url);
        let state_lock = self.state_for(&domain);
        let mut state = state_lock.lock().await;

        if self.rate_limit_codes.contains(&status_code) {
            state.fail_count += 1;
            if state.fail_count > self.config.max_retries {
                warn!(domain = %domain, fail_count = state.fail_count, "giving up on domain after repeated rate-limit responses");
                return ReportOutcome::GiveUpDomain;
            }
            let jitter = uniform(0.75, 1.25);
            state.current_delay_sec = (state.current_delay_sec * 2.0 * jitter).min(self.config.max_delay);
            warn!(domain = %domain, new_delay = state.current_delay_sec, "rate-limited, backing off");
        } else {
            let base = uniform(self.config.base_delay_lo, self.config.base_delay_hi);
            state.current_delay_sec = base.max(state.current_delay_sec * 0.75);
            state.fail_count = 0;
        }

        ReportOutcome::Continue
    }

    pub async fn domain_state(&self, domain: &str) -> Option<DomainState> {
        let state = self.states.get(domain)?.clone();
        Some(state.lock().await.clone())
    }
}

fn uniform(lo: f64, hi: f64) -> f64 {
    if lo >= hi {
        return lo;
    }
    rand::thread_rng().gen_range(lo..hi)
}
