//! Bounded in-process cache handler
//!
//! Moka cache with LRU eviction by entry count. Entries whose encoded size
//! exceeds `max_item_size_bytes` are refused. The handler honors the same
//! revalidation rules as the remote tier: tagged entries are dropped on
//! `revalidate_tag`, and implicit tags are compared by timestamp on read.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use tracing::debug;

use crate::config::LruConfig;
use crate::entry::{CacheEntry, GetContext};
use crate::error::Result;
use crate::handler::{CacheHandler, Clock, ImplicitTags, system_clock};
use crate::{CacheError, payload};

pub struct LocalLruHandler {
    cache: Cache<String, Arc<CacheEntry>>,
    config: LruConfig,
    implicit_tags: ImplicitTags,
    /// implicit tag -> last revalidation (ms)
    revalidated_tags: DashMap<String, i64>,
    clock: Clock,
}

impl LocalLruHandler {
    pub fn new(config: LruConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_items_number)
            .eviction_policy(EvictionPolicy::lru())
            .support_invalidation_closures()
            .build();

        Self {
            cache,
            config,
            implicit_tags: ImplicitTags::default(),
            revalidated_tags: DashMap::new(),
            clock: Arc::new(system_clock),
        }
    }

    pub fn with_implicit_tags(mut self, implicit_tags: ImplicitTags) -> Self {
        self.implicit_tags = implicit_tags;
        self
    }

    /// Replace the wall clock (epoch ms).
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Number of entries, after pending evictions are applied.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    fn revalidated_after(&self, entry: &CacheEntry, ctx: &GetContext) -> bool {
        entry
            .tags
            .iter()
            .chain(ctx.implicit_tags.iter())
            .filter_map(|tag| self.revalidated_tags.get(tag).map(|t| *t))
            .any(|revalidated_at| revalidated_at > entry.last_modified)
    }
}

impl Default for LocalLruHandler {
    fn default() -> Self {
        Self::new(LruConfig::default())
    }
}

#[async_trait]
impl CacheHandler for LocalLruHandler {
    fn name(&self) -> &str {
        "local-lru"
    }

    async fn get(&self, key: &str, ctx: &GetContext) -> Result<Option<CacheEntry>> {
        let Some(entry) = self.cache.get(key).await else {
            debug!("Local cache miss for key: {}", key);
            return Ok(None);
        };

        let now_secs = (self.clock)().div_euclid(1000);
        if entry
            .lifespan
            .as_ref()
            .is_some_and(|l| l.is_expired(now_secs))
        {
            debug!("Local entry for key {} expired", key);
            self.cache.invalidate(key).await;
            return Ok(None);
        }

        if self.revalidated_after(&entry, ctx) {
            debug!("Local entry for key {} predates a tag revalidation", key);
            self.cache.invalidate(key).await;
            return Ok(None);
        }

        debug!("Local cache hit for key: {}", key);
        Ok(Some(entry.as_ref().clone()))
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let size = payload::encode_entry(entry)?.len();
        if size > self.config.max_item_size_bytes {
            debug!(
                "Refusing key {} for local cache: {} bytes exceeds limit of {}",
                key, size, self.config.max_item_size_bytes
            );
            // An older value must not outlive the refused write
            self.cache.invalidate(key).await;
            return Ok(());
        }

        self.cache
            .insert(key.to_owned(), Arc::new(entry.clone()))
            .await;
        Ok(())
    }

    async fn revalidate_tag(&self, tag: &str) -> Result<()> {
        if self.implicit_tags.is_implicit(tag) {
            self.revalidated_tags.insert(tag.to_owned(), (self.clock)());
        }

        let tag = tag.to_owned();
        self.cache
            .invalidate_entries_if(move |_key, entry| entry.has_tag(&tag))
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
