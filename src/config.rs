//! Construction-time configuration surface (§6), in the shape of
//! `riptide-spider::config::SpiderConfig`: nested sub-configs, a `Default`
//! impl, fluent `with_*` builders, and a hand-written `validate`.

use crate::rate_limiter::RateLimitConfig;
use std::time::Duration;

/// Top-level crawl configuration.
#[derive(Debug, Clone)]
pub struct SpiderConfig {
    pub max_depth: usize,
    pub max_pages: usize,
    pub include_external: bool,
    pub score_threshold: f64,
    pub batch_size: usize,
    pub respect_crawl_delay: bool,
    pub checkpoint_interval: u64,
    pub user_agent: String,
    pub rate_limit: RateLimitConfig,
    pub dispatcher: DispatcherSettings,
}

/// Dispatcher-facing slice of the configuration, split out so
/// `Dispatcher::new` can take it without the rest of `SpiderConfig`.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_session_permit: usize,
    pub memory_threshold_percent: f64,
    pub check_interval: Duration,
    pub respect_robots: bool,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_session_permit: 10,
            memory_threshold_percent: 70.0,
            check_interval: Duration::from_millis(500),
            respect_robots: true,
        }
    }
}

impl Default for SpiderConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 100,
            include_external: false,
            score_threshold: f64::NEG_INFINITY,
            batch_size: 10,
            respect_crawl_delay: false,
            checkpoint_interval: 10,
            user_agent: "deepcrawl/0.1".to_string(),
            rate_limit: RateLimitConfig::default(),
            dispatcher: DispatcherSettings::default(),
        }
    }
}

impl SpiderConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_include_external(mut self, include_external: bool) -> Self {
        self.include_external = include_external;
        self
    }

    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_respect_crawl_delay(mut self, respect: bool) -> Self {
        self.respect_crawl_delay = respect;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_session_permit(mut self, permit: usize) -> Self {
        self.dispatcher.max_session_permit = permit;
        self
    }

    /// Hand-written validation: rejects configuration combinations that
    /// would make the engine's invariants (§8) unsatisfiable.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_depth == 0 {
            return Err("max_depth must be at least 1 (seed is depth 0)".to_string());
        }
        if self.max_pages == 0 {
            return Err("max_pages must be greater than 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }
        if self.checkpoint_interval == 0 {
            return Err("checkpoint_interval must be greater than 0".to_string());
        }
        if self.dispatcher.max_session_permit == 0 {
            return Err("max_session_permit must be greater than 0".to_string());
        }
        if !(0.0..=100.0).contains(&self.dispatcher.memory_threshold_percent) {
            return Err("memory_threshold_percent must be within [0, 100]".to_string());
        }
        if self.rate_limit.base_delay_lo < 0.0 || self.rate_limit.base_delay_hi < self.rate_limit.base_delay_lo {
            return Err("rate_limit.base_delay range is invalid (hi must be >= lo >= 0)".to_string());
        }
        if self.rate_limit.max_delay < self.rate_limit.base_delay_hi {
            return Err("rate_limit.max_delay must be >= base_delay_hi".to_string());
        }
        Ok(())
    }

    /// Tiers dispatcher concurrency and the memory gate to the available
    /// resources, in the spirit of `riptide-spider::config`'s
    /// `optimize_for_resources`.
    pub fn optimize_for_resources(mut self, available_memory_mb: u64, available_cores: usize) -> Self {
        let (permit, threshold) = if available_memory_mb < 1024 {
            (available_cores.max(1).min(4), 60.0)
        } else if available_memory_mb < 4096 {
            (available_cores.max(1).min(10), 70.0)
        } else {
            (available_cores.max(1).min(32), 80.0)
        };
        self.dispatcher.max_session_permit = permit;
        self.dispatcher.memory_threshold_percent = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SpiderConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_methods_chain() {
        let config = SpiderConfig::default()
            .with_max_depth(5)
            .with_max_pages(50)
            .with_batch_size(20);
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.max_pages, 50);
        assert_eq!(config.batch_size, 20);
    }

    #[test]
    fn rejects_zero_max_depth() {
        let config = SpiderConfig::default().with_max_depth(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_pages() {
        let config = SpiderConfig::default().with_max_pages(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_delay_range() {
        let mut config = SpiderConfig::default();
        config.rate_limit.base_delay_lo = 5.0;
        config.rate_limit.base_delay_hi = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn optimize_for_resources_tiers_by_memory() {
        let low = SpiderConfig::default().optimize_for_resources(512, 8);
        let high = SpiderConfig::default().optimize_for_resources(8192, 8);
        assert!(low.dispatcher.max_session_permit < high.dispatcher.max_session_permit);
    }
}
