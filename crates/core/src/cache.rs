//! Ephemeral key/value store with per-entry TTL.
//!
//! Entries past their expiry are invisible to readers even before the
//! background sweep removes them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

pub trait KeyValueCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String, ttl: Duration);
    fn delete(&self, key: &str);

    /// Writes only when no live entry holds `key`; `true` means this call
    /// stored the value. Check and write happen atomically.
    fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock }
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `sweep` every `interval` until the returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(event_name = "cache.sweep", removed, remaining = cache.len(), "swept expired cache entries");
                }
            }
        })
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        self.clock.now() + ttl
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
    }

    fn delete(&self, key: &str) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }

    fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|entry| entry.expires_at > now) {
            return false;
        }
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
        true
    }
}
