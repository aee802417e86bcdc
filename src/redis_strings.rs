//! Tag-indexed cache handler over a string key-value store
//!
//! Entries live as JSON strings under `prefix + key`. Three hashes sit next
//! to them:
//!
//! - `shared_tags_key`: `key -> JSON tag list`, present for every stored entry
//! - `shared_tags_ttl_key`: `key -> expireAt` (seconds), for entries with a lifespan
//! - `revalidated_tags_key`: `implicit tag -> last revalidation` (ms)
//!
//! There are no transactions. Readers repair what they find inconsistent:
//! an entry without a tag row, or one older than the revalidation time of
//! any of its tags, is deleted and reported as a miss. Index rows whose
//! entry expired on its own are swept on every tag revalidation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{KeyExpirationStrategy, RedisStringsConfig};
use crate::entry::{CacheEntry, GetContext};
use crate::error::{Result, first_error};
use crate::handler::{CacheHandler, Clock, ImplicitTags, system_clock};
use crate::payload;
use crate::store::{ClusterStore, HealthCheck, KeyValueStore, RedisStore, TimeoutStore};

pub struct RedisStringsHandler<S: KeyValueStore> {
    store: TimeoutStore<S>,
    config: RedisStringsConfig,
    implicit_tags: ImplicitTags,
    shared_tags_key: String,
    shared_tags_ttl_key: String,
    revalidated_tags_key: String,
    clock: Clock,
    /// Health check that brings the store back to ready; stops with the handler
    _health_check: Option<HealthCheck>,
}

impl RedisStringsHandler<RedisStore> {
    /// Connect to a Redis server and build a handler on top of it.
    ///
    /// A background health check keeps the readiness flag current.
    pub async fn connect(redis_client: redis::Client, config: RedisStringsConfig) -> Result<Self> {
        config.validate()?;
        let store = RedisStore::new(redis_client).await?;
        let health_check = store.spawn_health_check(config.health_check_interval);
        let mut handler = Self::new(Arc::new(store), config)?;
        handler._health_check = Some(health_check);
        Ok(handler)
    }
}

impl RedisStringsHandler<ClusterStore> {
    /// Connect to a Redis Cluster and build a handler on top of it.
    ///
    /// The handler is ready only while every node of the cluster answers.
    pub async fn connect_cluster(
        cluster_client: redis::cluster::ClusterClient,
        config: RedisStringsConfig,
    ) -> Result<Self> {
        config.validate()?;
        let store = RedisStore::cluster(cluster_client).await?;
        let health_check = store.spawn_health_check(config.health_check_interval);
        let mut handler = Self::new(Arc::new(store), config)?;
        handler._health_check = Some(health_check);
        Ok(handler)
    }
}

impl<S: KeyValueStore> RedisStringsHandler<S> {
    pub fn new(store: Arc<S>, config: RedisStringsConfig) -> Result<Self> {
        config.validate()?;

        let prefix = &config.key_prefix;
        Ok(Self {
            store: TimeoutStore::new(store, config.timeout),
            implicit_tags: ImplicitTags::new(config.implicit_tag_prefix.clone()),
            shared_tags_key: format!("{}{}", prefix, config.shared_tags_key),
            shared_tags_ttl_key: format!("{}{}", prefix, config.shared_tags_ttl_key),
            revalidated_tags_key: format!("{}{}", prefix, config.revalidated_tags_key),
            config,
            clock: Arc::new(system_clock),
            _health_check: None,
        })
    }

    /// Replace the wall clock (epoch ms).
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Abort every in-flight remote call once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.store = self.store.with_shutdown(token);
        self
    }

    fn assert_ready(&self) -> Result<()> {
        if self.store.is_ready() {
            Ok(())
        } else {
            Err(crate::CacheError::NotReady)
        }
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Read a whole hash page by page until the cursor wraps around.
    async fn scan_hash(&self, hash_key: &str) -> Result<HashMap<String, String>> {
        let mut rows = HashMap::new();
        let mut cursor = 0;
        loop {
            let page = self
                .store
                .hscan(hash_key, cursor, self.config.revalidate_tag_query_size)
                .await?;
            rows.extend(page.entries);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(rows)
    }

    /// Delete entries together with both of their index rows.
    ///
    /// All three deletions are attempted; the first failure is returned.
    async fn remove_entries(&self, keys: &[String]) -> Result<()> {
        let primary: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();

        let (unlinked, tags_removed, ttl_removed) = tokio::join!(
            self.store.unlink(&primary),
            self.store.hdel(&self.shared_tags_key, keys),
            self.store.hdel(&self.shared_tags_ttl_key, keys),
        );

        let results = [
            ("entries", unlinked.map(drop)),
            ("tag index", tags_removed.map(drop)),
            ("ttl index", ttl_removed.map(drop)),
        ];
        for (what, result) in &results {
            if let Err(e) = result {
                warn!("Failed to remove {} for {} key(s): {}", what, keys.len(), e);
            }
        }
        first_error(results.into_iter().map(|(_, r)| r))
    }

    /// Delete every indexed entry whose tag list contains `tag`.
    async fn revalidate_tagged(&self, tag: &str) -> Result<usize> {
        let index = self.scan_hash(&self.shared_tags_key).await?;

        let keys: Vec<String> = index
            .into_iter()
            .filter_map(|(key, tags)| match serde_json::from_str::<Vec<String>>(&tags) {
                Ok(tags) if tags.iter().any(|t| t == tag) => Some(key),
                Ok(_) => None,
                Err(e) => {
                    warn!("Skipping malformed tag index row for key {}: {}", key, e);
                    None
                }
            })
            .collect();

        if keys.is_empty() {
            return Ok(0);
        }

        self.remove_entries(&keys).await?;
        Ok(keys.len())
    }

    /// Purge index rows (and entries) whose recorded expiry has passed.
    ///
    /// The primary store expires entries on its own; this keeps the side
    /// indexes from growing without bound behind it. Every `revalidate_tag`
    /// runs the same sweep.
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.assert_ready()?;
        self.sweep_expired_rows().await
    }

    async fn sweep_expired_rows(&self) -> Result<usize> {
        let now_ms = (self.clock)();
        let ttl_rows = self.scan_hash(&self.shared_tags_ttl_key).await?;

        let keys: Vec<String> = ttl_rows
            .into_iter()
            .filter_map(|(key, expire_at)| match expire_at.parse::<i64>() {
                Ok(at) if now_ms > at.saturating_mul(1000) => Some(key),
                Ok(_) => None,
                Err(e) => {
                    warn!("Skipping malformed ttl index row for key {}: {}", key, e);
                    None
                }
            })
            .collect();

        if keys.is_empty() {
            return Ok(0);
        }

        self.remove_entries(&keys).await?;
        Ok(keys.len())
    }

    /// Whether any of `tags` was revalidated after `last_modified`.
    async fn revalidated_since(&self, tags: &[String], last_modified: i64) -> Result<bool> {
        let times = self.store.hmget(&self.revalidated_tags_key, tags).await?;
        Ok(times
            .into_iter()
            .flatten()
            .filter_map(|t| t.parse::<i64>().ok())
            .any(|revalidated_at| revalidated_at > last_modified))
    }
}

#[async_trait]
impl<S: KeyValueStore> CacheHandler for RedisStringsHandler<S> {
    fn name(&self) -> &str {
        "redis-strings"
    }

    async fn get(&self, key: &str, ctx: &GetContext) -> Result<Option<CacheEntry>> {
        self.assert_ready()?;

        let redis_key = self.prefixed_key(key);
        let Some(raw) = self.store.get(&redis_key).await? else {
            debug!("Cache miss for key: {}", key);
            return Ok(None);
        };

        let entry = match payload::decode_entry(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    "Failed to decode cached value for key {}: {}. Deleting corrupt entry.",
                    key, e
                );
                if let Err(del_err) = self.remove_entries(&[key.to_owned()]).await {
                    warn!("Failed to delete corrupt entry for key {}: {}", key, del_err);
                }
                return Ok(None);
            }
        };

        if !self.store.hexists(&self.shared_tags_key, key).await? {
            debug!("Tag index row missing for key {}; evicting entry", key);
            self.store.unlink(&[redis_key]).await?;
            return Ok(None);
        }

        let mut seen = HashSet::new();
        let combined_tags: Vec<String> = entry
            .tags
            .iter()
            .chain(ctx.implicit_tags.iter())
            .filter(|t| seen.insert(*t))
            .cloned()
            .collect();

        if combined_tags.is_empty() {
            debug!("Cache hit for key: {}", key);
            return Ok(Some(entry));
        }

        if self
            .revalidated_since(&combined_tags, entry.last_modified)
            .await?
        {
            debug!("Entry for key {} predates a tag revalidation; evicting", key);
            self.store.unlink(&[redis_key]).await?;
            return Ok(None);
        }

        debug!("Cache hit for key: {}", key);
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        self.assert_ready()?;

        let redis_key = self.prefixed_key(key);
        let document = payload::encode_entry(entry)?;
        let tags = serde_json::to_string(&entry.tags)?;
        let expire_at = entry.expire_at();

        let set_tags = self.store.hset(&self.shared_tags_key, key, &tags);
        // A ttl row left by an earlier write would get this entry swept.
        let set_ttl = async {
            match expire_at {
                Some(at) => {
                    self.store
                        .hset(&self.shared_tags_ttl_key, key, &at.to_string())
                        .await
                }
                None => self
                    .store
                    .hdel(&self.shared_tags_ttl_key, &[key.to_owned()])
                    .await
                    .map(drop),
            }
        };
        let (tags_result, ttl_result) = tokio::join!(set_tags, set_ttl);
        first_error([tags_result, ttl_result])?;

        match self.config.key_expiration_strategy {
            KeyExpirationStrategy::ExAt => {
                self.store.set(&redis_key, &document, expire_at).await?;
            }
            KeyExpirationStrategy::ExpireAt => {
                self.store.set(&redis_key, &document, None).await?;
                if let Some(at) = expire_at {
                    self.store.expire_at(&redis_key, at).await?;
                }
            }
        }

        debug!(
            "Stored key {} with {} tag(s), expireAt {:?}",
            key,
            entry.tags.len(),
            expire_at
        );
        Ok(())
    }

    async fn revalidate_tag(&self, tag: &str) -> Result<()> {
        self.assert_ready()?;

        // Entries not reached by the scan below still miss on their next read.
        if self.implicit_tags.is_implicit(tag) {
            let now = (self.clock)();
            self.store
                .hset(&self.revalidated_tags_key, tag, &now.to_string())
                .await?;
            debug!("Recorded revalidation of implicit tag {} at {}", tag, now);
        }

        let (tagged, swept) = tokio::join!(self.revalidate_tagged(tag), self.sweep_expired_rows());

        match &tagged {
            Ok(n) => debug!("Revalidated tag {}: removed {} entries", tag, n),
            Err(e) => warn!("Revalidation of tag {} failed: {}", tag, e),
        }
        match &swept {
            Ok(n) if *n > 0 => debug!("Swept {} expired index rows", n),
            Ok(_) => {}
            Err(e) => warn!("Sweep of expired index rows failed: {}", e),
        }

        first_error([tagged.map(drop), swept.map(drop)])
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.assert_ready()?;
        self.remove_entries(&[key.to_owned()]).await
    }
}
