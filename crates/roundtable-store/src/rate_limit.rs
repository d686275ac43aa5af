use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::StoreError;

pub const DEFAULT_MAX_PER_WINDOW: usize = 30;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Per-sender sliding-window limiter guarding message-emitting operations.
///
/// Buckets live in process memory only; a restart resets all quotas. One
/// limiter instance is injected per access layer, so multiple processes
/// sharing a store each enforce their own window.
pub struct RateLimiter {
    max: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt for `sender`, or reject without recording when the
    /// window quota is already spent.
    pub fn check(&self, sender: &str) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(sender.to_string()).or_default();

        while let Some(oldest) = bucket.front() {
            if now.duration_since(*oldest) > self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() >= self.max {
            return Err(StoreError::RateLimited {
                max: self.max,
                window_secs: self.window.as_secs(),
            });
        }

        bucket.push_back(now);
        Ok(())
    }

    /// Clear all buckets (for tests).
    pub fn reset(&self) {
        self.buckets.lock().clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_WINDOW, DEFAULT_WINDOW)
    }
}
