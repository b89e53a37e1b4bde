//! Sliding-window rate limiter.
//!
//! Consulted before a turn may start. Keys are `user:<id>` for signed-in
//! callers and `ip:<addr>` otherwise. The limiter is an injected object, one
//! per process; its only state is the per-key timestamp window.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quarry_contracts::error::{QuarryError, QuarryResult};

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 10,
            window_secs: 60,
        }
    }
}

/// Build the limiter key for a request.
///
/// `forwarded_for` is the raw `X-Forwarded-For` header; its first address is
/// used.
pub fn rate_limit_key(user_id: Option<&str>, forwarded_for: Option<&str>) -> String {
    match user_id {
        Some(id) if !id.is_empty() => format!("user:{}", id),
        _ => {
            let ip = forwarded_for
                .and_then(|h| h.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .unwrap_or("unknown");
            format!("ip:{}", ip)
        }
    }
}

/// The outcome of one successful check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: usize,
    pub remaining: usize,
    /// Time until the oldest counted request leaves the window.
    pub reset_after: Duration,
}

#[derive(Debug, Default)]
struct Windows {
    keys: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

impl Windows {
    /// Drop every key with no hit inside `window`.
    fn sweep(&mut self, now: Instant, window: Duration) {
        if let Some(last) = self.last_sweep {
            if now.saturating_duration_since(last) < window {
                return;
            }
        }
        let before = self.keys.len();
        self.keys.retain(|_, hits| {
            hits.back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < window)
        });
        self.last_sweep = Some(now);
        let evicted = before - self.keys.len();
        if evicted > 0 {
            debug!(evicted, tracked = self.keys.len(), "rate limiter keys swept");
        }
    }
}

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Windows::default()),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    /// Count one request for `key` now.
    ///
    /// Returns `QuarryError::RateLimited` with a retry-after hint when the
    /// window is full. Refused requests are not counted.
    pub fn check(&self, key: &str) -> QuarryResult<RateLimitStatus> {
        self.check_at(key, Instant::now())
    }

    /// `check` with an explicit clock, for tests and replay.
    pub fn check_at(&self, key: &str, now: Instant) -> QuarryResult<RateLimitStatus> {
        let window = self.window();
        let mut windows = self.lock()?;
        windows.sweep(now, window);
        let entry = windows.keys.entry(key.to_string()).or_default();

        while let Some(oldest) = entry.front() {
            if now.saturating_duration_since(*oldest) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }

        let reset_after = entry
            .front()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(window);

        if entry.len() >= self.config.requests {
            if entry.is_empty() {
                windows.keys.remove(key);
            }
            let retry_after_secs = reset_after.as_secs_f64().ceil() as u64;
            warn!(key = %key, retry_after_secs, "rate limit exceeded");
            return Err(QuarryError::RateLimited {
                key: key.to_string(),
                retry_after_secs: retry_after_secs.max(1),
            });
        }

        entry.push_back(now);
        Ok(RateLimitStatus {
            limit: self.config.requests,
            remaining: self.config.requests - entry.len(),
            reset_after,
        })
    }

    /// Number of keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.lock().map(|windows| windows.keys.len()).unwrap_or(0)
    }

    fn lock(&self) -> QuarryResult<std::sync::MutexGuard<'_, Windows>> {
        self.windows.lock().map_err(|e| QuarryError::ConfigError {
            reason: format!("rate limiter lock poisoned: {}", e),
        })
    }
}
