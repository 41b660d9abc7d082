//! Background eviction of expired state
//!
//! Runs on a fixed interval until its cancellation token fires. Each pass
//! goes through the components' own APIs, so it never holds a lock spanning
//! two of them.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::rate_limiter::RateLimiter;
use crate::task_registry::TaskRegistry;

/// Counts removed by one reaper pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub tasks: usize,
    pub cache_entries: usize,
    pub rate_windows: usize,
}

/// One eviction pass
pub fn reap_once(
    registry: &TaskRegistry,
    cache: &ResultCache,
    limiter: &RateLimiter,
    task_ttl: Duration,
) -> ReapReport {
    ReapReport {
        tasks: registry.reap_expired(task_ttl),
        cache_entries: cache.purge_expired(),
        rate_windows: limiter.purge_idle(),
    }
}

pub fn spawn_reaper(
    registry: Arc<TaskRegistry>,
    cache: Arc<ResultCache>,
    limiter: Arc<RateLimiter>,
    interval: Duration,
    task_ttl: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    info!(
        "Starting reaper: task retention {}s, interval {}s",
        task_ttl.as_secs(),
        interval.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = reap_once(&registry, &cache, &limiter, task_ttl);
                    if report == ReapReport::default() {
                        debug!("Reaper pass found nothing to evict");
                    } else {
                        info!(
                            "Reaper evicted {} tasks, {} cache entries, {} rate windows",
                            report.tasks, report.cache_entries, report.rate_windows
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn components() -> (Arc<TaskRegistry>, Arc<ResultCache>, Arc<RateLimiter>) {
        (
            Arc::new(TaskRegistry::new()),
            Arc::new(ResultCache::new(true, Duration::from_secs(30))),
            Arc::new(RateLimiter::new(true, 10, Duration::from_secs(30))),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_evicts_on_each_tick_and_stops_on_cancel() {
        let (registry, cache, limiter) = components();
        let id = registry.create();
        registry.mark_started(&id).unwrap();
        registry.mark_completed(&id, Vec::new()).unwrap();
        cache.put("f", Vec::new());
        limiter.allow("client");

        let shutdown = CancellationToken::new();
        let handle = spawn_reaper(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&limiter),
            Duration::from_secs(60),
            Duration::from_secs(45),
            shutdown.clone(),
        );
        // Let the reaper arm its interval at t=0
        tokio::task::yield_now().await;

        advance(Duration::from_secs(61)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(registry.is_empty());
        assert!(cache.is_empty());
        assert_eq!(limiter.current_count("client"), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn live_state_survives_a_pass() {
        let (registry, cache, limiter) = components();
        let queued = registry.create();
        cache.put("f", Vec::new());

        advance(Duration::from_secs(10)).await;
        let report = reap_once(&registry, &cache, &limiter, Duration::from_secs(5));
        assert_eq!(report, ReapReport::default());
        assert!(registry.get(&queued).is_ok());
        assert_eq!(cache.len(), 1);
    }
}
