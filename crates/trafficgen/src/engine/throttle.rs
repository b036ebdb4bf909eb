//! Per-key suppression of repetitive warning logs.

use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Remembers the last emission time per key so callers can cap identical
/// warnings (one DNS-failure line per 30 s, one line per failing endpoint,
/// and so on). Keys are arbitrary strings; no ordering is guaranteed across
/// keys.
#[derive(Clone, Debug)]
pub struct LogThrottle {
    window: Duration,
    last: Arc<Mutex<HashMap<String, Instant>>>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns whether the key is clear to log, recording the emission when
    /// it is.
    pub fn ready(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        match last.get(key) {
            Some(prev) if now.duration_since(*prev) < self.window => false,
            _ => {
                last.insert(key.to_owned(), now);
                true
            }
        }
    }
}
