//! Cache configuration

use std::{fmt, str::FromStr, time::Duration};

use crate::CacheError;

/// How the primary entry receives its absolute expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyExpirationStrategy {
    /// `SET key value EXAT <ts>` in one command
    ExAt,
    /// `SET key value` followed by `EXPIREAT key <ts>`
    #[default]
    ExpireAt,
}

impl FromStr for KeyExpirationStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXAT" => Ok(Self::ExAt),
            "EXPIREAT" => Ok(Self::ExpireAt),
            other => Err(CacheError::InvalidConfiguration(format!(
                "Invalid keyExpirationStrategy: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for KeyExpirationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExAt => f.write_str("EXAT"),
            Self::ExpireAt => f.write_str("EXPIREAT"),
        }
    }
}

/// Configuration for the Redis strings handler
#[derive(Debug, Clone)]
pub struct RedisStringsConfig {
    /// Prefix applied to every key, including the side-index hashes
    pub key_prefix: String,
    /// Hash holding `entry key -> JSON tag list`
    pub shared_tags_key: String,
    /// Hash holding `entry key -> expireAt (seconds)`
    pub shared_tags_ttl_key: String,
    /// Hash holding `implicit tag -> last revalidation (ms)`
    pub revalidated_tags_key: String,
    /// Upper bound for every remote call
    pub timeout: Duration,
    pub key_expiration_strategy: KeyExpirationStrategy,
    /// `COUNT` hint for HSCAN pages during revalidation
    pub revalidate_tag_query_size: usize,
    /// Tags starting with this prefix are implicit
    pub implicit_tag_prefix: String,
    /// Period of the readiness check started by `connect`
    pub health_check_interval: Duration,
}

impl Default for RedisStringsConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            shared_tags_key: "__sharedTags__".to_owned(),
            shared_tags_ttl_key: "__sharedTagsTtl__".to_owned(),
            revalidated_tags_key: "__revalidated_tags__".to_owned(),
            timeout: Duration::from_secs(5),
            key_expiration_strategy: KeyExpirationStrategy::default(),
            revalidate_tag_query_size: 10_000,
            implicit_tag_prefix: "_N_T_".to_owned(),
            health_check_interval: Duration::from_secs(1),
        }
    }
}

impl RedisStringsConfig {
    /// Check values that cannot be expressed through the type system.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.revalidate_tag_query_size == 0 {
            return Err(CacheError::InvalidConfiguration(
                "revalidate_tag_query_size must be greater than zero".to_owned(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(CacheError::InvalidConfiguration(
                "timeout must be greater than zero".to_owned(),
            ));
        }
        if self.health_check_interval.is_zero() {
            return Err(CacheError::InvalidConfiguration(
                "health_check_interval must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the local LRU handler
#[derive(Debug, Clone)]
pub struct LruConfig {
    /// Maximum number of entries kept in memory
    pub max_items_number: u64,
    /// Entries larger than this are not stored
    pub max_item_size_bytes: usize,
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            max_items_number: 1000,
            max_item_size_bytes: 100 * 1024 * 1024, // 100 MiB
        }
    }
}
