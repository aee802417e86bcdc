//! tagcache - Tag-indexed cache handlers
//!
//! This library provides cache handlers with tag-based bulk invalidation on
//! top of a plain key-value store:
//! - Redis strings handler: entries plus side indexes (tag list, expiry,
//!   implicit-tag revalidation times) kept consistent lazily on read
//! - Local LRU handler: bounded in-memory Moka tier
//! - Composite handler: first-hit reads, routed writes, fan-out invalidation
//!
//! Every remote call is bounded by a timeout and can be aborted through a
//! shared cancellation token.

pub mod abort;
pub mod composite;
mod config;
pub mod entry;
mod error;
mod handler;
pub mod lifespan;
pub mod local_lru;
pub mod payload;
pub mod redis_strings;
pub mod store;

pub use abort::{AbortSignal, with_abort_signal};
pub use composite::CompositeHandler;
pub use config::{KeyExpirationStrategy, LruConfig, RedisStringsConfig};
pub use entry::{AppPageValue, CacheEntry, CacheValue, GetContext, RouteValue};
pub use error::{CacheError, Result};
pub use handler::{CacheHandler, Clock, ImplicitTags};
pub use lifespan::{ExpireAgeEstimator, Lifespan};
pub use local_lru::LocalLruHandler;
pub use redis_strings::RedisStringsHandler;
pub use store::{
    ClusterStore, HashScan, HealthCheck, KeyValueStore, MemoryStore, RedisConnection, RedisStore,
    TimeoutStore,
};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
