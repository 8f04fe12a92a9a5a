use crate::prelude::*;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Sliding-window admission control keyed by client identity (source address
/// plus offered credential, so a shared NAT address with distinct keys gets
/// independent budgets).
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::seconds(window_secs as i64),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Prunes expired entries for this identity, then admits iff the window
    /// still has room. Admitted requests are recorded at `now`.
    pub fn allow(&self, identity: &str, now: DateTime<Utc>) -> bool {
        let mut windows = self.windows.lock().unwrap();
        let entries = windows.entry(identity.to_string()).or_default();

        let cutoff = now - self.window;
        entries.retain(|instant| *instant > cutoff);

        if entries.len() >= self.max_requests {
            debug!("rate limit hit for {}", identity);
            return false;
        }

        entries.push(now);
        true
    }
}
