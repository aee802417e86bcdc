//! The cache-handler interface exposed to the host integration layer

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::entry::{CacheEntry, GetContext};
use crate::error::Result;

/// Source of "now" in epoch milliseconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub(crate) fn system_clock() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[async_trait]
pub trait CacheHandler: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    async fn get(&self, key: &str, ctx: &GetContext) -> Result<Option<CacheEntry>>;

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()>;

    /// Invalidate every entry carrying `tag`.
    async fn revalidate_tag(&self, tag: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Naming convention for implicit tags
#[derive(Debug, Clone)]
pub struct ImplicitTags {
    prefix: String,
}

impl ImplicitTags {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn is_implicit(&self, tag: &str) -> bool {
        !self.prefix.is_empty() && tag.starts_with(&self.prefix)
    }
}

impl Default for ImplicitTags {
    fn default() -> Self {
        Self::new("_N_T_")
    }
}
