//! Fixed-window rate limiter keyed by caller scope.
//!
//! Each scope owns one [`RateWindow`]. Windows live in a `DashMap`, so a call
//! for one scope only locks the shard holding that scope. Rollover is lazy and
//! happens on the next `allow` for the scope.

use dashmap::DashMap;
use log::debug;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ServiceConfig;

/// Scope used when the caller does not identify itself
pub const GLOBAL_SCOPE: &str = "global";

/// Bookkeeping for one scope
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub window_start: Instant,
    pub count: u32,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    /// Advance to the window containing `now`, resetting the count
    fn roll(&mut self, now: Instant, period: Duration) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < period {
            return;
        }
        let skipped = elapsed.as_nanos() / period.as_nanos();
        let advance = u64::try_from(period.as_nanos() * skipped).unwrap_or(u64::MAX);
        self.window_start = self
            .window_start
            .checked_add(Duration::from_nanos(advance))
            .unwrap_or(now);
        self.count = 0;
    }

    fn is_live(&self, now: Instant, period: Duration) -> bool {
        now.saturating_duration_since(self.window_start) < period
    }
}

/// Fixed-window request limiter
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    limit: u32,
    period: Duration,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new(enabled: bool, limit: u32, period: Duration) -> Self {
        Self {
            enabled,
            limit,
            period: period.max(Duration::from_millis(1)),
            windows: DashMap::new(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            config.rate_limit_enabled,
            config.rate_limit_requests,
            config.rate_limit_period,
        )
    }

    /// Count a request for `scope` and decide whether it may proceed.
    ///
    /// A refused request leaves the window untouched. When limiting is
    /// disabled every request is allowed but still counted, which keeps
    /// `request_rate` meaningful.
    pub fn allow(&self, scope: &str) -> bool {
        let now = Instant::now();
        let mut window = self
            .windows
            .entry(scope.to_string())
            .or_insert_with(|| RateWindow::new(now));
        window.roll(now, self.period);

        if self.enabled && window.count >= self.limit {
            debug!(
                "Rate limit reached for scope {} ({}/{})",
                scope, window.count, self.limit
            );
            return false;
        }

        window.count = window.count.saturating_add(1);
        true
    }

    /// Requests counted in the current window of `scope`
    pub fn current_count(&self, scope: &str) -> u32 {
        let now = Instant::now();
        self.windows
            .get(scope)
            .filter(|w| w.is_live(now, self.period))
            .map(|w| w.count)
            .unwrap_or(0)
    }

    /// Requests per second over every live window
    pub fn request_rate(&self) -> f64 {
        let now = Instant::now();
        let total: u64 = self
            .windows
            .iter()
            .filter(|w| w.is_live(now, self.period))
            .map(|w| u64::from(w.count))
            .sum();
        total as f64 / self.period.as_secs_f64()
    }

    /// Drop windows that ended; returns how many were removed
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| w.is_live(now, self.period));
        before.saturating_sub(self.windows.len())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn third_request_in_window_is_refused() {
        let limiter = RateLimiter::new(true, 2, Duration::from_secs(60));

        assert!(limiter.allow(GLOBAL_SCOPE));
        advance(Duration::from_millis(300)).await;
        assert!(limiter.allow(GLOBAL_SCOPE));
        advance(Duration::from_millis(300)).await;
        assert!(!limiter.allow(GLOBAL_SCOPE));
        assert_eq!(limiter.current_count(GLOBAL_SCOPE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn window_rolls_over_lazily() {
        let limiter = RateLimiter::new(true, 2, Duration::from_secs(60));
        assert!(limiter.allow(GLOBAL_SCOPE));
        assert!(limiter.allow(GLOBAL_SCOPE));
        assert!(!limiter.allow(GLOBAL_SCOPE));

        advance(Duration::from_secs(61)).await;
        assert!(limiter.allow(GLOBAL_SCOPE));
        assert_eq!(limiter.current_count(GLOBAL_SCOPE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn window_start_aligns_to_period_boundary() {
        let limiter = RateLimiter::new(true, 1, Duration::from_secs(10));
        assert!(limiter.allow(GLOBAL_SCOPE));

        // 25s later the current window started at 20s, so it ends at 30s
        advance(Duration::from_secs(25)).await;
        assert!(limiter.allow(GLOBAL_SCOPE));
        advance(Duration::from_secs(4)).await;
        assert!(!limiter.allow(GLOBAL_SCOPE));
        advance(Duration::from_secs(1)).await;
        assert!(limiter.allow(GLOBAL_SCOPE));
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_limit_per_window() {
        let limiter = RateLimiter::new(true, 5, Duration::from_secs(1));
        for _ in 0..3 {
            let allowed = (0..20).filter(|_| limiter.allow("client-a")).count();
            assert_eq!(allowed, 5);
            advance(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scopes_are_independent() {
        let limiter = RateLimiter::new(true, 1, Duration::from_secs(60));
        assert!(limiter.allow("client-a"));
        assert!(!limiter.allow("client-a"));
        assert!(limiter.allow("client-b"));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_limiter_allows_but_counts() {
        let limiter = RateLimiter::new(false, 1, Duration::from_secs(10));
        for _ in 0..5 {
            assert!(limiter.allow(GLOBAL_SCOPE));
        }
        assert_eq!(limiter.current_count(GLOBAL_SCOPE), 5);
        assert!((limiter.request_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_windows_are_purged() {
        let limiter = RateLimiter::new(true, 3, Duration::from_secs(5));
        limiter.allow("client-a");
        limiter.allow("client-b");
        advance(Duration::from_secs(6)).await;
        limiter.allow("client-c");

        assert_eq!(limiter.purge_idle(), 2);
        assert_eq!(limiter.current_count("client-c"), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_respect_the_limit() {
        let limiter = std::sync::Arc::new(RateLimiter::new(true, 50, Duration::from_secs(3600)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                (0..20).filter(|_| limiter.allow(GLOBAL_SCOPE)).count()
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            allowed += handle.await.unwrap();
        }
        assert_eq!(allowed, 50);
    }
}
