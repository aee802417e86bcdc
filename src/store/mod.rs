//! Key-value backends consumed by the tag-indexed handler
//!
//! [`KeyValueStore`] is the minimal capability set the handler needs:
//! plain strings with absolute expiry, hashes with cursor scans, and a
//! readiness flag. Keys are passed through verbatim; namespacing is the
//! caller's job.

mod health;
mod memory;
mod redis;
mod timeout;

pub use self::health::HealthCheck;
pub use self::memory::MemoryStore;
pub use self::redis::{ClusterStore, RedisConnection, RedisStore};
pub use self::timeout::TimeoutStore;

use async_trait::async_trait;

use crate::error::Result;

/// One page of an `HSCAN`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashScan {
    /// Cursor for the next page; `0` once the scan is complete
    pub cursor: u64,
    pub entries: Vec<(String, String)>,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Whether the connection is currently healthy
    fn is_ready(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a string, optionally with an absolute expiry in unix seconds.
    async fn set(&self, key: &str, value: &str, expire_at: Option<i64>) -> Result<()>;

    /// Set an absolute expiry in unix seconds; `false` if the key is missing.
    async fn expire_at(&self, key: &str, unix_secs: i64) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove keys, returning how many existed.
    async fn unlink(&self, keys: &[String]) -> Result<u64>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    async fn hexists(&self, key: &str, field: &str) -> Result<bool>;

    /// Fetch several fields at once, in request order.
    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>>;

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;

    async fn hscan(&self, key: &str, cursor: u64, count: usize) -> Result<HashScan>;
}
