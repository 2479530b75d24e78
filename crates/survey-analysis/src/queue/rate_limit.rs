//! Rolling-window cap on how many jobs the pool may dequeue.
//!
//! Independent of worker concurrency: with three workers and a cap of ten
//! per minute, at most ten jobs start in any sixty-second window.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_dequeues: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_dequeues: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window limiter shared by all workers of a pool.
pub struct DequeueLimiter {
    config: RateLimitConfig,
    history: Mutex<Vec<Instant>>,
}

impl DequeueLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Runs `claim` only if the window has room, and records a dequeue when
    /// it yields a job. The lock is held across the claim so concurrent
    /// workers cannot overshoot the cap.
    pub fn try_admit<T, E>(
        &self,
        claim: impl FnOnce() -> Result<Option<T>, E>,
    ) -> Result<Option<T>, E> {
        self.try_admit_at(Instant::now(), claim)
    }

    fn try_admit_at<T, E>(
        &self,
        now: Instant,
        claim: impl FnOnce() -> Result<Option<T>, E>,
    ) -> Result<Option<T>, E> {
        let mut history = self.lock_history();
        Self::prune(&mut history, now, self.config.window);

        if history.len() >= self.config.max_dequeues as usize {
            return Ok(None);
        }

        let claimed = claim()?;
        if claimed.is_some() {
            history.push(now);
        }
        Ok(claimed)
    }

    /// Time until the window frees a slot, or `None` if one is free now.
    pub fn time_until_available(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut history = self.lock_history();
        Self::prune(&mut history, now, self.config.window);

        if history.len() < self.config.max_dequeues as usize {
            return None;
        }
        history
            .first()
            .map(|oldest| self.config.window.saturating_sub(now.duration_since(*oldest)))
    }

    /// Dequeues recorded in the current window.
    pub fn in_window(&self) -> usize {
        let mut history = self.lock_history();
        Self::prune(&mut history, Instant::now(), self.config.window);
        history.len()
    }

    fn prune(history: &mut Vec<Instant>, now: Instant, window: Duration) {
        history.retain(|t| now.duration_since(*t) < window);
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, Vec<Instant>> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Dequeue limiter lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
