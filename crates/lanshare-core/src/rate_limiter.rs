//! Metadata rate limiting
//!
//! Bounds how many `file-meta` messages a peer may open per rolling window,
//! so a misbehaving peer cannot churn inbound transfers. Only accepted
//! messages count against the limit.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window limiter for `file-meta` messages
#[derive(Debug, Clone)]
pub struct MetaRateLimiter {
    /// Maximum accepted messages per window
    max_per_window: usize,
    /// Window length
    window: Duration,
    /// Acceptance times within the current window, oldest first
    accepted: VecDeque<Instant>,
}

impl MetaRateLimiter {
    /// Create a limiter allowing `max_per_window` messages per `window`
    #[must_use]
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            accepted: VecDeque::with_capacity(max_per_window),
        }
    }

    /// Check (and record) a message arriving now
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    /// Check (and record) a message arriving at `now`
    pub fn check_at(&mut self, now: Instant) -> bool {
        self.expire(now);
        if self.accepted.len() >= self.max_per_window {
            return false;
        }
        self.accepted.push_back(now);
        true
    }

    /// Messages that would still be accepted at `now`
    #[must_use]
    pub fn remaining(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.max_per_window.saturating_sub(self.accepted.len())
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.accepted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.accepted.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_limit_within_window() {
        let mut limiter = MetaRateLimiter::new(10, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..10 {
            assert!(limiter.check_at(now));
        }
        assert!(!limiter.check_at(now));
        assert_eq!(limiter.remaining(now), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let mut limiter = MetaRateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at(start));
        assert!(limiter.check_at(start + Duration::from_secs(30)));
        assert!(!limiter.check_at(start + Duration::from_secs(59)));

        // First entry expires, second still counts
        let later = start + Duration::from_secs(60);
        assert_eq!(limiter.remaining(later), 1);
        assert!(limiter.check_at(later));
        assert!(!limiter.check_at(later));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_do_not_count() {
        let mut limiter = MetaRateLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.check_at(start));
        for i in 1..20 {
            assert!(!limiter.check_at(start + Duration::from_millis(i * 100)));
        }
        assert!(limiter.check_at(start + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_uses_clock() {
        let mut limiter = MetaRateLimiter::new(1, Duration::from_secs(1));
        assert!(limiter.check());
        assert!(!limiter.check());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.check());
    }
}
