// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-client rolling-window rate limiting for the supervisor's HTTP
//! surface.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Tracks request timestamps per client key over a one-minute window.
pub struct RateLimiter {
    limit_per_minute: u32,
    windows: Mutex<HashMap<String, Vec<Instant>>>,
}

/// Window over which requests are counted.
const WINDOW: Duration = Duration::from_secs(60);

impl RateLimiter {
    /// Creates a limiter admitting at most `limit_per_minute` requests
    /// per client key per rolling minute.
    #[must_use]
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request from `key` and returns `Ok(())` if it is
    /// admitted, or `Err(retry_after)` if the client's window is full.
    pub async fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let timestamps = windows.entry(key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < WINDOW);

        if timestamps.len() >= self.limit_per_minute as usize {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = WINDOW.saturating_sub(now.duration_since(oldest));
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.check("client").await.is_ok());
        assert!(limiter.check("client").await.is_ok());
        assert!(limiter.check("client").await.is_err());
    }

    #[tokio::test]
    async fn separate_keys_have_separate_windows() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("a").await.is_ok());
        assert!(limiter.check("b").await.is_ok());
        assert!(limiter.check("a").await.is_err());
    }
}
