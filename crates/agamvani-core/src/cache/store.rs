use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::pattern::KeyPattern;

/// Maximum number of entries before LRU eviction kicks in.
/// Radio state is a handful of keys; 50 leaves room for per-day schedules.
pub const DEFAULT_MAX_SIZE: usize = 50;

/// TTL used by [`CacheStore::set`] when the caller doesn't pass one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Expiry horizon for TTLs too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

struct CacheEntry<V> {
    value: V,
    expiry: Instant,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expiry
    }
}

/// Snapshot of the store for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub keys: Vec<String>,
}

/// In-memory key/value store with per-entry TTL and bounded size.
///
/// Every operation takes the internal lock for its whole duration, so the
/// store can be shared through an `Arc` between the poll task and any number
/// of readers while `size <= max_size` holds at every observation point.
/// Time comes from `tokio::time`, which lets tests pause and advance it.
pub struct CacheStore<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    max_size: usize,
    default_ttl: Duration,
}

impl<V: Clone> CacheStore<V> {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_settings(max_size, DEFAULT_TTL)
    }

    pub fn with_settings(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
            default_ttl,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store `value` under `key` with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// Inserting a new key into a full store first drops expired entries,
    /// then, if still full, the entry with the oldest access time.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            entries.retain(|_, entry| !entry.is_expired(now));

            if entries.len() >= self.max_size {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    debug!(key = %oldest, "Evicted least recently used cache entry");
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                expiry: expiry_after(now, ttl),
                last_access: now,
            },
        );
    }

    /// Returns the value if present and not expired, touching its access time.
    /// An expired entry is removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = entries.get(key)?.is_expired(now);
        if expired {
            entries.remove(key);
            debug!(key = %key, "Cache entry expired");
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.value.clone())
    }

    /// Time left before `key` expires, without touching its access time.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expiry.saturating_duration_since(now))
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remove every key matching `pattern` (see [`KeyPattern`] for syntax).
    /// Returns the number of removed entries.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let pattern = KeyPattern::parse(pattern);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(?pattern, removed, "Invalidated cache entries");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop every expired entry now rather than on next access.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        CacheStats {
            size: entries.len(),
            max_size: self.max_size,
            keys,
        }
    }
}

fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_value_expires_after_ttl() {
        let store = CacheStore::new();
        store.set_with_ttl("now-playing", 1, Duration::from_secs(30));
        assert_eq!(store.get("now-playing"), Some(1));

        tokio::time::advance(Duration::from_secs(30)).await;
        // Exactly at expiry the entry is still valid
        assert_eq!(store.get("now-playing"), Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.get("now-playing"), None);
        // Stale entry was purged on read
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies() {
        let store = CacheStore::with_settings(10, Duration::from_secs(5));
        store.set("k", "v");
        assert_eq!(store.ttl_remaining("k"), Some(Duration::from_secs(5)));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!store.has("k"));
        assert_eq!(store.ttl_remaining("k"), None);
    }

    #[test]
    fn test_falsy_values_are_hits() {
        let store: CacheStore<Option<bool>> = CacheStore::new();
        store.set("flag", Some(false));
        store.set("nothing", None);
        assert!(store.has("flag"));
        assert!(store.has("nothing"));
        assert_eq!(store.get("nothing"), Some(None));
        assert!(!store.has("missing"));
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let store = CacheStore::new();
        store.set("k", 1);
        store.set("k", 2);
        assert_eq!(store.get("k"), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_respects_recent_reads() {
        let step = Duration::from_millis(5);
        let store = CacheStore::with_capacity(3);
        store.set("first", 1);
        tokio::time::advance(step).await;
        store.set("second", 2);
        tokio::time::advance(step).await;
        store.set("third", 3);
        tokio::time::advance(step).await;

        // Touch first so second becomes the oldest
        assert_eq!(store.get("first"), Some(1));
        tokio::time::advance(step).await;

        store.set("fourth", 4);

        assert_eq!(store.len(), 3);
        assert!(store.has("first"));
        assert!(!store.has("second"));
        assert!(store.has("third"));
        assert!(store.has("fourth"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_is_clamped_not_overflowed() {
        let store = CacheStore::new();
        store.set_with_ttl("forever", 1, Duration::MAX);
        assert_eq!(store.get("forever"), Some(1));
        assert_eq!(store.ttl_remaining("forever"), Some(FAR_FUTURE));

        tokio::time::advance(Duration::from_secs(86400)).await;
        assert!(store.has("forever"));
    }

    #[test]
    fn test_configured_max_ttl_does_not_panic() {
        let config: crate::config::Config =
            serde_json::from_str(r#"{"schedule_ttl_secs": 18446744073709551615}"#)
                .expect("Failed to parse config");
        let store = CacheStore::new();
        store.set_with_ttl("schedule:2025-11-08", 1, config.sync_settings().schedule_ttl);
        assert_eq!(store.get("schedule:2025-11-08"), Some(1));
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let store = CacheStore::with_capacity(2);
        store.set("a", 1);
        store.set("b", 2);
        store.set("a", 3);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("b"), Some(2));
        assert_eq!(store.get("a"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_go_before_live_ones() {
        let store = CacheStore::with_capacity(2);
        store.set_with_ttl("short", 1, Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(10)).await;
        store.set_with_ttl("long", 2, Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(2)).await;

        // Touch nothing: "short" is both oldest and expired, "long" survives
        store.set("new", 3);
        assert_eq!(store.stats().keys, vec!["long".to_string(), "new".to_string()]);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let store = CacheStore::with_capacity(5);
        for i in 0..100 {
            store.set(format!("key:{i}"), i);
            assert!(store.len() <= 5);
        }
        assert_eq!(store.stats().max_size, 5);
    }

    #[test]
    fn test_invalidate_pattern() {
        let store = CacheStore::new();
        store.set("schedule:2025-01-01", 1);
        store.set("schedule:2025-01-02", 2);
        store.set("now-playing", 3);

        assert_eq!(store.invalidate("schedule:*"), 2);
        assert_eq!(store.stats().keys, vec!["now-playing".to_string()]);

        // No matches is fine
        assert_eq!(store.invalidate("schedule:*"), 0);
        assert_eq!(store.invalidate("now-playing"), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let store = CacheStore::new();
        store.set("a", 1);
        store.set("b", 2);
        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(
            store.stats(),
            CacheStats {
                size: 0,
                max_size: DEFAULT_MAX_SIZE,
                keys: vec![],
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = CacheStore::new();
        store.set_with_ttl("a", 1, Duration::from_secs(1));
        store.set_with_ttl("b", 2, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.stats().keys, vec!["b".to_string()]);
    }
}
