use anyhow::Result;
use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use std::{num::NonZeroUsize, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Number of driver names kept in memory
pub const DRIVER_NAME_CACHE_CAPACITY: usize = 100;

/// Source of driver display names, consulted on a cache miss
#[async_trait]
pub trait DriverDirectory: Send + Sync {
    async fn driver_name(&self, driver_id: i64) -> Result<String>;
}

/// Name shown when the directory cannot resolve a driver
pub fn placeholder_name(driver_id: i64) -> String {
    format!("Driver #{}", driver_id)
}

/// Directory that never calls out and labels every driver by id.
/// Used when no Motive API key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderDirectory;

#[async_trait]
impl DriverDirectory for PlaceholderDirectory {
    async fn driver_name(&self, driver_id: i64) -> Result<String> {
        Ok(placeholder_name(driver_id))
    }
}

/// Resolves driver ids to display names through a bounded LRU cache.
///
/// The cache lock covers only the cache operation itself. Directory lookups
/// run outside it, so misses for different drivers proceed concurrently.
/// Two concurrent misses for the same id may both hit the directory; the
/// second insert simply refreshes the entry.
#[derive(Clone)]
pub struct DriverNameCache {
    directory: Arc<dyn DriverDirectory>,
    names: Arc<Mutex<LruCache<i64, String>>>,
}

impl DriverNameCache {
    pub fn new(directory: Arc<dyn DriverDirectory>) -> Self {
        Self::with_capacity(
            directory,
            NonZeroUsize::new(DRIVER_NAME_CACHE_CAPACITY).expect("capacity is non-zero"),
        )
    }

    pub fn with_capacity(directory: Arc<dyn DriverDirectory>, capacity: NonZeroUsize) -> Self {
        Self {
            directory,
            names: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Return the display name for `driver_id`.
    ///
    /// Never fails: a directory error yields [`placeholder_name`], which is
    /// not cached so the next event retries the lookup.
    pub async fn resolve(&self, driver_id: i64) -> String {
        if let Some(name) = self.get(driver_id).await {
            counter!("driver_names.cache.hit").increment(1);
            return name;
        }

        counter!("driver_names.cache.miss").increment(1);
        match self.directory.driver_name(driver_id).await {
            Ok(name) => {
                self.insert(driver_id, name.clone()).await;
                name
            }
            Err(e) => {
                counter!("driver_names.lookup_failed").increment(1);
                warn!(driver_id, error = %e, "Driver name lookup failed, using placeholder");
                placeholder_name(driver_id)
            }
        }
    }

    /// Cached name for `driver_id`, marking it most recently used
    pub async fn get(&self, driver_id: i64) -> Option<String> {
        self.names.lock().await.get(&driver_id).cloned()
    }

    /// Insert or refresh a name, evicting the least recently used entry when full
    pub async fn insert(&self, driver_id: i64, name: String) {
        let evicted = self.names.lock().await.push(driver_id, name);
        if let Some((evicted_id, _)) = evicted
            && evicted_id != driver_id
        {
            debug!(driver_id = evicted_id, "Evicted driver name from cache");
        }
    }

    /// Whether `driver_id` is cached, without touching its recency
    pub async fn contains(&self, driver_id: i64) -> bool {
        self.names.lock().await.contains(&driver_id)
    }

    pub async fn len(&self) -> usize {
        self.names.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.names.lock().await.is_empty()
    }
}
