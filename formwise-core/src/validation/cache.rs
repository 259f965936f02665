//! TTL cache for async validation results
//!
//! Entries are keyed by field and a canonical rendering of the validated
//! value, so two different fields holding the same value never share an
//! entry. Expiry is measured on the tokio clock, which lets tests drive it
//! with a paused runtime.

use formwise_types::{FieldId, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::ValidationResult;

/// Cache key: field id plus the canonical JSON text of the value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub field_id: FieldId,
    pub value: String,
}

impl CacheKey {
    pub fn new(field_id: &FieldId, value: &Value) -> Self {
        // serde_json keeps object keys sorted without `preserve_order`, so
        // equal values always render identically
        CacheKey {
            field_id: field_id.clone(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ValidationResult,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Get cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hits: {} | misses: {} | hit rate: {:.1}% | entries: {}",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.entries
        )
    }
}

/// In-memory result cache with per-entry TTL
#[derive(Debug, Default)]
pub struct ValidationCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ValidationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live entry. Expired entries are dropped on the way.
    pub fn get(&self, key: &CacheKey) -> Option<ValidationResult> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.result.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: CacheKey, result: ValidationResult, ttl: Duration) {
        let entry = CacheEntry {
            result,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().insert(key, entry);
    }

    /// Drop every entry for one field. Returns how many were removed.
    pub fn remove_field(&self, field_id: &FieldId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| &key.field_id != field_id);
        before - entries.len()
    }

    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
