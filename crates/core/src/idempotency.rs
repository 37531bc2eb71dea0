//! Marker families used to collapse redelivered and self-echoed webhook
//! events into a single processed effect.

use std::sync::Arc;

use crate::cache::KeyValueCache;
use crate::config::CacheConfig;

const PROCESSED_PREFIX: &str = "processed_";
const OUTBOUND_PREFIX: &str = "outbound_";
const DEBOUNCE_PREFIX: &str = "recent_bot_send_";

pub fn processed_key(message_id: &str) -> String {
    format!("{PROCESSED_PREFIX}{message_id}")
}

pub fn outbound_key(message_id: &str) -> String {
    format!("{OUTBOUND_PREFIX}{message_id}")
}

pub fn debounce_key(user_id: &str) -> String {
    format!("{DEBOUNCE_PREFIX}{user_id}")
}

#[derive(Clone)]
pub struct IdempotencyMarkers {
    cache: Arc<dyn KeyValueCache>,
    settings: CacheConfig,
}

impl IdempotencyMarkers {
    pub fn new(cache: Arc<dyn KeyValueCache>, settings: CacheConfig) -> Self {
        Self { cache, settings }
    }

    /// Returns `false` when the id was already seen. The marker is claimed
    /// atomically before any processing, so of two simultaneous deliveries
    /// exactly one proceeds.
    pub fn mark_inbound(&self, message_id: &str) -> bool {
        self.cache.set_if_absent(
            &processed_key(message_id),
            "1".to_string(),
            self.settings.inbound_ttl(),
        )
    }

    /// Called before the network send so an echo racing the HTTP response is
    /// already recognized.
    pub fn register_outbound(&self, message_id: &str) {
        self.cache.set(&processed_key(message_id), "1".to_string(), self.settings.inbound_ttl());
    }

    pub fn confirm_outbound(&self, message_id: &str) {
        self.cache.set(&outbound_key(message_id), "1".to_string(), self.settings.outbound_ttl());
    }

    pub fn is_echo(&self, external_id: &str) -> bool {
        self.cache.contains(&outbound_key(external_id))
            || self.cache.contains(&processed_key(external_id))
    }

    pub fn note_bot_send(&self, user_id: &str, sent_at_millis: i64) {
        self.cache.set(
            &debounce_key(user_id),
            sent_at_millis.to_string(),
            self.settings.debounce(),
        );
    }

    pub fn recently_sent(&self, user_id: &str) -> bool {
        self.cache.contains(&debounce_key(user_id))
    }
}
