//! Timestamped caching of API payloads on top of [`KeyValueStore`].

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::storage::KeyValueStore;

pub const DEFAULT_TTL_SECS: i64 = 5 * 60;
pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;
pub const DEFAULT_CLEANUP_PATTERNS: [&str; 3] = ["cache_", "workspaces_cache_", "temp_"];

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub cache_key: String,
    pub ttl: Duration,
    pub enabled: bool,
}

impl CacheOptions {
    pub fn new(cache_key: impl Into<String>) -> Self {
        Self {
            cache_key: cache_key.into(),
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            enabled: true,
        }
    }

    pub fn from_config(cfg: &Config, cache_key: impl Into<String>) -> anyhow::Result<Self> {
        let mut options = Self::new(cache_key);
        if let Some(secs) = cfg.get_u64("cache.ttl_secs")? {
            let secs = i64::try_from(secs).context("cache.ttl_secs is too large")?;
            options.ttl = Duration::seconds(secs);
        }
        if let Some(enabled) = cfg.get_bool("cache.enabled") {
            options.enabled = enabled;
        }
        Ok(options)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    data: T,
    timestamp: i64,
}

/// One cached API resource. The in-memory copy is served while it is
/// fresh; storage is consulted only on the first fetch.
pub struct ApiCache<T> {
    options: CacheOptions,
    store: Arc<dyn KeyValueStore>,
    data: Option<T>,
    last_fetch: Option<DateTime<Utc>>,
    initial_load: bool,
    loading: bool,
}

impl<T> ApiCache<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(options: CacheOptions, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            options,
            store,
            data: None,
            last_fetch: None,
            initial_load: true,
            loading: false,
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.last_fetch
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if !self.options.enabled {
            return false;
        }
        self.last_fetch
            .is_some_and(|fetched| now - fetched < self.options.ttl)
    }

    /// Remaining freshness, floored at zero. `None` before the first fetch.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        let fetched = self.last_fetch?;
        let remaining = self.options.ttl - (now - fetched);
        Some(remaining.max(Duration::zero()))
    }

    #[tracing::instrument(skip(self), fields(key = %self.options.cache_key))]
    pub fn load_from_storage(&mut self, now: DateTime<Utc>) -> Option<T> {
        if !self.options.enabled {
            return None;
        }
        match self.read_entry(now) {
            Ok(found) => found,
            Err(err) => {
                error!(error = %format!("{err:#}"), "failed loading cache entry");
                None
            }
        }
    }

    fn read_entry(&mut self, now: DateTime<Utc>) -> anyhow::Result<Option<T>> {
        let key = self.options.cache_key.as_str();
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        let entry: CacheEntry<T> =
            serde_json::from_str(&raw).with_context(|| format!("corrupt cache entry {key}"))?;

        if now.timestamp_millis() - entry.timestamp > self.options.ttl.num_milliseconds() {
            debug!(key, "cache entry expired; removing");
            self.store.remove(key)?;
            return Ok(None);
        }

        self.last_fetch = DateTime::<Utc>::from_timestamp_millis(entry.timestamp);
        Ok(Some(entry.data))
    }

    #[tracing::instrument(skip(self, data), fields(key = %self.options.cache_key))]
    pub fn save(&mut self, now: DateTime<Utc>, data: &T) {
        if !self.options.enabled {
            return;
        }
        let entry = CacheEntry {
            data,
            timestamp: now.timestamp_millis(),
        };
        let written = serde_json::to_string(&entry)
            .context("failed to encode cache entry")
            .and_then(|raw| self.store.set(&self.options.cache_key, &raw));
        match written {
            Ok(()) => self.last_fetch = Some(now),
            Err(err) => error!(error = %format!("{err:#}"), "failed saving cache entry"),
        }
    }

    /// Returns fresh in-memory data, then stored data on the first call,
    /// and only then runs `fetch`. Fetch errors propagate with the key as
    /// context and leave the cached data untouched.
    #[tracing::instrument(skip(self, fetch), fields(key = %self.options.cache_key))]
    pub async fn fetch_with_cache<F, Fut>(
        &mut self,
        now: DateTime<Utc>,
        force_refresh: bool,
        fetch: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !force_refresh
            && self.is_valid(now)
            && let Some(data) = &self.data
        {
            debug!("serving in-memory cache");
            return Ok(data.clone());
        }

        if self.initial_load
            && !force_refresh
            && let Some(stored) = self.load_from_storage(now)
        {
            debug!("serving stored cache");
            self.data = Some(stored.clone());
            self.initial_load = false;
            return Ok(stored);
        }

        self.loading = true;
        debug!("fetching fresh data");
        let fetched = fetch().await;
        self.loading = false;

        let fresh = fetched.with_context(|| format!("fetch failed for {}", self.options.cache_key))?;
        self.data = Some(fresh.clone());
        self.save(now, &fresh);
        self.initial_load = false;
        Ok(fresh)
    }

    #[tracing::instrument(skip(self), fields(key = %self.options.cache_key))]
    pub fn clear(&mut self) {
        match self.store.remove(&self.options.cache_key) {
            Ok(()) => {
                self.data = None;
                self.last_fetch = None;
                info!("cleared cache");
            }
            Err(err) => error!(error = %format!("{err:#}"), "failed clearing cache"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub key_count: usize,
    pub total_size: usize,
}

/// Removes pattern-matching entries whose `timestamp` is older than
/// `max_age`. Entries that do not parse are logged and left alone.
#[tracing::instrument(skip(store, patterns))]
pub fn cleanup_old_caches(
    store: &dyn KeyValueStore,
    max_age: Duration,
    patterns: &[&str],
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let now_ms = now.timestamp_millis();
    let mut stale = Vec::new();

    for key in store.keys()? {
        if !patterns.iter().any(|pattern| key.contains(pattern)) {
            continue;
        }
        let Some(raw) = store.get(&key)? else {
            continue;
        };
        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to parse cache entry");
                continue;
            }
        };
        let timestamp = parsed.get("timestamp").and_then(Value::as_i64);
        if let Some(timestamp) = timestamp.filter(|ts| *ts != 0)
            && now_ms - timestamp > max_age.num_milliseconds()
        {
            stale.push(key);
        }
    }

    if !stale.is_empty() {
        store.multi_remove(&stale)?;
        info!(removed = stale.len(), "cleaned up old cache entries");
    }
    Ok(stale.len())
}

pub fn storage_stats(store: &dyn KeyValueStore) -> anyhow::Result<StorageStats> {
    let keys = store.keys()?;
    let mut total_size = 0;
    for key in &keys {
        if let Some(value) = store.get(key)? {
            total_size += key.chars().count() + value.chars().count();
        }
    }
    Ok(StorageStats {
        key_count: keys.len(),
        total_size,
    })
}

/// Trims a stored JSON array to `max_size` items. Returns whether the
/// array was shortened.
#[tracing::instrument(skip(store))]
pub fn limit_array_size(
    store: &dyn KeyValueStore,
    key: &str,
    max_size: usize,
    keep_newest: bool,
) -> anyhow::Result<bool> {
    let Some(raw) = store.get(key)? else {
        return Ok(false);
    };
    let mut items: Vec<Value> =
        serde_json::from_str(&raw).with_context(|| format!("{key} does not hold a JSON array"))?;
    if items.len() <= max_size {
        return Ok(false);
    }

    let before = items.len();
    if keep_newest {
        items.drain(..before - max_size);
    } else {
        items.truncate(max_size);
    }
    store.set(key, &serde_json::to_string(&items)?)?;
    info!(key, before, after = max_size, "trimmed stored array");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::Arc;

    use anyhow::anyhow;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{
        ApiCache, CacheOptions, DEFAULT_CLEANUP_PATTERNS, cleanup_old_caches, limit_array_size,
        storage_stats,
    };
    use crate::storage::{KeyValueStore, MemoryStore};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0)
            .single()
            .expect("valid instant")
    }

    fn cache(store: &Arc<MemoryStore>) -> ApiCache<Vec<String>> {
        ApiCache::new(CacheOptions::new("cache_workspaces"), store.clone())
    }

    #[tokio::test]
    async fn serves_memory_until_ttl_then_refetches() {
        let store = Arc::new(MemoryStore::new());
        let mut cache = cache(&store);
        let calls = Cell::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.set(counter.get() + 1);
            Ok(vec![format!("fetch-{}", counter.get())])
        };

        let first = cache.fetch_with_cache(t0(), false, fetch).await.expect("first");
        assert_eq!(first, ["fetch-1"]);
        assert!(cache.is_valid(t0() + Duration::minutes(4)));
        assert_eq!(cache.time_until_expiry(t0() + Duration::minutes(4)), Some(Duration::minutes(1)));

        let second = cache
            .fetch_with_cache(t0() + Duration::minutes(4), false, fetch)
            .await
            .expect("second");
        assert_eq!(second, ["fetch-1"]);
        assert_eq!(calls.get(), 1);

        let later = t0() + Duration::minutes(6);
        assert!(!cache.is_valid(later));
        assert_eq!(cache.time_until_expiry(later), Some(Duration::zero()));
        let third = cache.fetch_with_cache(later, false, fetch).await.expect("third");
        assert_eq!(third, ["fetch-2"]);
        assert!(!cache.is_loading());
    }

    #[tokio::test]
    async fn first_fetch_reads_storage() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "cache_workspaces",
                &json!({"data": ["stored"], "timestamp": t0().timestamp_millis()}).to_string(),
            )
            .expect("seed");
        let mut cache = cache(&store);

        let got = cache
            .fetch_with_cache(t0() + Duration::minutes(1), false, || async {
                Err(anyhow!("network should not be touched"))
            })
            .await
            .expect("stored hit");
        assert_eq!(got, ["stored"]);
        assert_eq!(cache.last_fetch(), Some(t0()));
    }

    #[test]
    fn expired_storage_entry_is_removed() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "cache_workspaces",
                &json!({"data": ["old"], "timestamp": t0().timestamp_millis()}).to_string(),
            )
            .expect("seed");
        let mut cache = cache(&store);

        assert_eq!(cache.load_from_storage(t0() + Duration::minutes(10)), None);
        assert_eq!(store.get("cache_workspaces").expect("get"), None);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_fresh_data_and_errors_propagate() {
        let store = Arc::new(MemoryStore::new());
        let mut cache = cache(&store);
        cache
            .fetch_with_cache(t0(), false, || async { Ok(vec!["one".to_string()]) })
            .await
            .expect("prime");

        let forced = cache
            .fetch_with_cache(t0(), true, || async { Ok(vec!["two".to_string()]) })
            .await
            .expect("forced");
        assert_eq!(forced, ["two"]);

        let failed = cache
            .fetch_with_cache(t0(), true, || async { Err(anyhow!("offline")) })
            .await;
        assert!(failed.is_err());
        assert!(!cache.is_loading());
        assert_eq!(cache.data().map(Vec::as_slice), Some(&["two".to_string()][..]));

        cache.clear();
        assert!(cache.data().is_none());
        assert!(cache.time_until_expiry(t0()).is_none());
        assert_eq!(store.get("cache_workspaces").expect("get"), None);
    }

    #[tokio::test]
    async fn disabled_cache_always_fetches() {
        let store = Arc::new(MemoryStore::new());
        let mut options = CacheOptions::new("cache_profile");
        options.enabled = false;
        let mut cache: ApiCache<u32> = ApiCache::new(options, store.clone());

        cache.fetch_with_cache(t0(), false, || async { Ok(1) }).await.expect("one");
        let again = cache.fetch_with_cache(t0(), false, || async { Ok(2) }).await.expect("two");
        assert_eq!(again, 2);
        assert!(store.keys().expect("keys").is_empty());
    }

    #[test]
    fn cleanup_removes_only_stale_matching_entries() {
        let store = MemoryStore::new();
        let now = t0();
        let old = (now - Duration::days(8)).timestamp_millis();
        let fresh = (now - Duration::days(1)).timestamp_millis();
        store.set("cache_feed", &json!({"data": 1, "timestamp": old}).to_string()).expect("seed");
        store.set("temp_upload", &json!({"timestamp": fresh}).to_string()).expect("seed");
        store.set("cache_broken", "{not json").expect("seed");
        store.set("settings", &json!({"timestamp": old}).to_string()).expect("seed");

        let removed = cleanup_old_caches(&store, Duration::days(7), &DEFAULT_CLEANUP_PATTERNS, now)
            .expect("cleanup");

        assert_eq!(removed, 1);
        assert_eq!(store.keys().expect("keys"), ["cache_broken", "settings", "temp_upload"]);
    }

    #[test]
    fn stats_and_array_limits() {
        let store = MemoryStore::new();
        store.set("recent", "[1,2,3,4,5]").expect("seed");
        store.set("ab", "xyz").expect("seed");

        let stats = storage_stats(&store).expect("stats");
        assert_eq!(stats.key_count, 2);
        assert_eq!(stats.total_size, "recent".len() + 11 + 2 + 3);

        assert!(limit_array_size(&store, "recent", 3, true).expect("limit"));
        assert_eq!(store.get("recent").expect("get"), Some("[3,4,5]".to_string()));
        assert!(limit_array_size(&store, "recent", 2, false).expect("limit"));
        assert_eq!(store.get("recent").expect("get"), Some("[3,4]".to_string()));
        assert!(!limit_array_size(&store, "recent", 5, true).expect("limit"));
        assert!(limit_array_size(&store, "ab", 1, true).is_err());
    }
}
