use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{HashScan, KeyValueStore};
use crate::error::Result;

struct StringValue {
    value: String,
    /// Unix seconds
    expire_at: Option<i64>,
}

impl StringValue {
    fn is_expired(&self, now_secs: i64) -> bool {
        self.expire_at.is_some_and(|at| at <= now_secs)
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// In-process [`KeyValueStore`] with the same observable semantics as Redis
/// for the commands the handlers use.
///
/// Expired strings are dropped lazily on access. Hash scan cursors are
/// offsets into the field order, so concurrent writes may shift a page.
pub struct MemoryStore {
    strings: DashMap<String, StringValue>,
    hashes: DashMap<String, BTreeMap<String, String>>,
    ready: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            strings: DashMap::new(),
            hashes: DashMap::new(),
            ready: AtomicBool::new(true),
        }
    }

    /// Flip the readiness flag (simulates a lost connection).
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of live string keys
    #[must_use]
    pub fn len(&self) -> usize {
        let now = now_secs();
        self.strings.iter().filter(|e| !e.is_expired(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fields in a hash
    #[must_use]
    pub fn hlen(&self, key: &str) -> usize {
        self.hashes.get(key).map(|h| h.len()).unwrap_or(0)
    }

    /// Expiry recorded for a string key, if any
    #[must_use]
    pub fn expiry_of(&self, key: &str) -> Option<i64> {
        self.strings.get(key).and_then(|v| v.expire_at)
    }

    fn live_string(&self, key: &str) -> Option<String> {
        let now = now_secs();
        let expired = match self.strings.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.strings.remove(key);
        }
        None
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_string(key))
    }

    async fn set(&self, key: &str, value: &str, expire_at: Option<i64>) -> Result<()> {
        self.strings.insert(
            key.to_owned(),
            StringValue {
                value: value.to_owned(),
                expire_at,
            },
        );
        Ok(())
    }

    async fn expire_at(&self, key: &str, unix_secs: i64) -> Result<bool> {
        if self.live_string(key).is_none() {
            return Ok(false);
        }
        match self.strings.get_mut(key) {
            Some(mut entry) => {
                entry.expire_at = Some(unix_secs);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_string(key).is_some() || self.hashes.contains_key(key))
    }

    async fn unlink(&self, keys: &[String]) -> Result<u64> {
        let now = now_secs();
        let mut removed = 0;
        for key in keys {
            if let Some((_, value)) = self.strings.remove(key)
                && !value.is_expired(now)
            {
                removed += 1;
            }
            if self.hashes.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        Ok(())
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self
            .hashes
            .get(key)
            .is_some_and(|h| h.contains_key(field)))
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        let hash = self.hashes.get(key);
        Ok(fields
            .iter()
            .map(|f| hash.as_ref().and_then(|h| h.get(f).cloned()))
            .collect())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        let (removed, now_empty) = match self.hashes.get_mut(key) {
            Some(mut hash) => {
                let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
                (removed as u64, hash.is_empty())
            }
            None => return Ok(0),
        };
        // Redis drops a hash once its last field is gone
        if now_empty {
            self.hashes.remove_if(key, |_, h| h.is_empty());
        }
        Ok(removed)
    }

    async fn hscan(&self, key: &str, cursor: u64, count: usize) -> Result<HashScan> {
        let Some(hash) = self.hashes.get(key) else {
            return Ok(HashScan::default());
        };

        let start = cursor as usize;
        let entries: Vec<(String, String)> = hash
            .iter()
            .skip(start)
            .take(count.max(1))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let next = start + entries.len();
        let cursor = if next >= hash.len() { 0 } else { next as u64 };

        Ok(HashScan { cursor, entries })
    }
}
