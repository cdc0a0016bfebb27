//! Per-backend fixed-window request counter

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    reset_at: Instant,
}

/// Counts requests per backend name inside a fixed window.
///
/// Exceeding the ceiling fails fast with [`AppError::RateLimited`]; nothing is
/// queued or delayed here.
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    counters: DashMap<String, WindowCounter>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            counters: DashMap::new(),
        }
    }

    /// Record one request for `backend`, or fail if its window is full.
    pub fn check(&self, backend: &str) -> Result<()> {
        let now = Instant::now();
        let mut counter = self
            .counters
            .entry(backend.to_lowercase())
            .or_insert_with(|| WindowCounter {
                count: 0,
                reset_at: now + self.window,
            });

        if now >= counter.reset_at {
            counter.count = 0;
            counter.reset_at = now + self.window;
        }

        if counter.count >= self.max_requests {
            let retry_after = counter.reset_at.saturating_duration_since(now);
            warn!(
                backend = %backend,
                limit = self.max_requests,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            return Err(AppError::RateLimited {
                backend: backend.to_string(),
                retry_after,
            });
        }

        counter.count += 1;
        Ok(())
    }

    /// Requests still available to `backend` in the current window
    pub fn remaining(&self, backend: &str) -> u32 {
        let now = Instant::now();
        match self.counters.get(&backend.to_lowercase()) {
            Some(counter) if now < counter.reset_at => {
                self.max_requests.saturating_sub(counter.count)
            }
            _ => self.max_requests,
        }
    }
}
