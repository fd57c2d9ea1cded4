/// Sliding-window request limiter
///
/// Keeps the instants of recent requests per key and admits a request when
/// fewer than `limit` fall inside the window. State lives in this process
/// only; each API instance enforces its own limit.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Result of a limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed
    pub allowed: bool,

    /// Requests left in the current window after this one
    pub remaining: u32,

    /// Time until the oldest request leaves the window (zero when allowed)
    pub retry_after: Duration,
}

impl RateDecision {
    /// `retry_after` rounded up to whole seconds, at least 1
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    hits: DashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: DashMap::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a request for `key` if it fits the window
    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// [`SlidingWindowLimiter::check`] against an explicit clock
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut entry = self.hits.entry(key.to_string()).or_default();
        let hits = entry.value_mut();

        while let Some(oldest) = hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if (hits.len() as u32) < self.limit {
            hits.push_back(now);
            return RateDecision {
                allowed: true,
                remaining: self.limit - hits.len() as u32,
                retry_after: Duration::ZERO,
            };
        }

        let retry_after = hits
            .front()
            .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(self.window);

        RateDecision {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }

    /// Drops keys whose requests have all left the window
    pub fn prune(&self) {
        self.prune_at(Instant::now());
    }

    fn prune_at(&self, now: Instant) {
        self.hits.retain(|_, hits| {
            hits.back()
                .map(|latest| now.saturating_duration_since(*latest) < self.window)
                .unwrap_or(false)
        });
    }

    /// Prunes idle keys every `every` until the task is aborted
    pub fn spawn_pruner(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let before = limiter.tracked_keys();
                limiter.prune();
                let pruned = before.saturating_sub(limiter.tracked_keys());
                if pruned > 0 {
                    debug!(pruned, remaining = limiter.tracked_keys(), "Pruned idle rate limit keys");
                }
            }
        })
    }

    /// Number of tracked keys
    pub fn tracked_keys(&self) -> usize {
        self.hits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.check_at("u1", now).remaining, 2);
        assert_eq!(limiter.check_at("u1", now).remaining, 1);
        assert_eq!(limiter.check_at("u1", now).remaining, 0);

        let denied = limiter.check_at("u1", now);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
        assert_eq!(denied.retry_after_secs(), 60);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at("u1", now).allowed);
        assert!(!limiter.check_at("u1", now).allowed);
        assert!(limiter.check_at("u2", now).allowed);
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_window_slides() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.check_at("u1", start).allowed);
        assert!(limiter.check_at("u1", start + Duration::from_secs(4)).allowed);

        let denied = limiter.check_at("u1", start + Duration::from_secs(6));
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(4));

        // First request has aged out
        let allowed = limiter.check_at("u1", start + Duration::from_secs(10));
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, 0);
    }

    #[test]
    fn test_denied_requests_are_not_counted() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.check_at("u1", start).allowed);
        for i in 1..5 {
            assert!(!limiter.check_at("u1", start + Duration::from_secs(i)).allowed);
        }
        assert!(limiter.check_at("u1", start + Duration::from_secs(10)).allowed);
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        let decision = RateDecision {
            allowed: false,
            remaining: 0,
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(decision.retry_after_secs(), 2);

        let zero = RateDecision {
            allowed: false,
            remaining: 0,
            retry_after: Duration::ZERO,
        };
        assert_eq!(zero.retry_after_secs(), 1);
    }

    #[test]
    fn test_prune_removes_idle_keys() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_millis(1));
        limiter.check("u1");
        std::thread::sleep(Duration::from_millis(5));
        limiter.prune();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_prune_keeps_active_keys() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(10));
        let start = Instant::now();
        limiter.check_at("idle", start);
        limiter.check_at("active", start + Duration::from_secs(8));

        limiter.prune_at(start + Duration::from_secs(12));
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(limiter.check_at("active", start + Duration::from_secs(12)).remaining, 3);
    }

    #[tokio::test]
    async fn test_pruner_task_drops_idle_keys() {
        let limiter = Arc::new(SlidingWindowLimiter::new(5, Duration::from_millis(1)));
        for user in ["u1", "u2", "u3"] {
            limiter.check(user);
        }

        let pruner = limiter.spawn_pruner(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        pruner.abort();

        assert_eq!(limiter.tracked_keys(), 0);
    }
}
