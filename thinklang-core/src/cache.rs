//! Exact-match TTL cache for AI-call results

use crate::canonical_json;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Exact-match cache keyed by the SHA-256 of the canonical JSON of
/// `{prompt, context, schema}`.
///
/// A hit is indistinguishable from a fresh call that produced the same
/// payload. Expired entries are deleted on probe.
pub struct ExactMatchCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    enabled: bool,
}

impl ExactMatchCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new(ttl: Duration, enabled: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            enabled,
        }
    }

    /// Compute the cache key for a call. Misses differ exactly when any one
    /// of prompt, effective context, or schema differs.
    pub fn key(prompt: &str, context: &Value, schema: &Value) -> String {
        let document = serde_json::json!({
            "prompt": prompt,
            "context": context,
            "schema": schema,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(&document).as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, value: Value) {
        if !self.enabled {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key,
                CacheEntry {
                    value,
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ExactMatchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExactMatchCache")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_returns_stored_value() {
        let cache = ExactMatchCache::new(Duration::from_secs(60), true);
        let key = ExactMatchCache::key("p", &json!({}), &json!({"type": "string"}));
        cache.put(key.clone(), json!("a"));
        assert_eq!(cache.get(&key), Some(json!("a")));
    }

    #[test]
    fn key_differs_when_any_input_differs() {
        let schema = json!({"type": "string"});
        let base = ExactMatchCache::key("p", &json!({"a": 1}), &schema);
        assert_ne!(base, ExactMatchCache::key("q", &json!({"a": 1}), &schema));
        assert_ne!(base, ExactMatchCache::key("p", &json!({"a": 2}), &schema));
        assert_ne!(
            base,
            ExactMatchCache::key("p", &json!({"a": 1}), &json!({"type": "integer"}))
        );
    }

    #[test]
    fn key_ignores_context_key_order() {
        let schema = json!({"type": "string"});
        let a = ExactMatchCache::key("p", &json!({"a": 1, "b": 2}), &schema);
        let b = ExactMatchCache::key("p", &json!({"b": 2, "a": 1}), &schema);
        assert_eq!(a, b);
    }

    #[test]
    fn expired_entries_are_deleted_on_probe() {
        let cache = ExactMatchCache::new(Duration::from_millis(0), true);
        cache.put("k".to_string(), json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_cache_is_a_no_op() {
        let cache = ExactMatchCache::new(Duration::from_secs(60), false);
        cache.put("k".to_string(), json!(1));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }
}
