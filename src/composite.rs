//! Composite handler routing over several backends
//!
//! Reads try handlers in order and return the first hit. Writes go to the
//! single handler picked by the set strategy. Invalidations fan out to every
//! handler so a fast local tier can never keep serving what the remote tier
//! already dropped.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::CacheError;
use crate::entry::{CacheEntry, GetContext};
use crate::error::{Result, first_error};
use crate::handler::CacheHandler;

type SetStrategy = dyn Fn(&CacheEntry) -> usize + Send + Sync;

pub struct CompositeHandler {
    handlers: Vec<Arc<dyn CacheHandler>>,
    set_strategy: Box<SetStrategy>,
}

impl CompositeHandler {
    /// Compose `handlers`, writing to the first one by default.
    pub fn new(handlers: Vec<Arc<dyn CacheHandler>>) -> Result<Self> {
        if handlers.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "composite handler needs at least one handler".to_owned(),
            ));
        }
        Ok(Self {
            handlers,
            set_strategy: Box::new(|_| 0),
        })
    }

    /// Pick the handler index receiving each `set`.
    pub fn with_set_strategy<F>(mut self, strategy: F) -> Self
    where
        F: Fn(&CacheEntry) -> usize + Send + Sync + 'static,
    {
        self.set_strategy = Box::new(strategy);
        self
    }

    fn log_failures(&self, operation: &str, results: &[Result<()>]) {
        for (handler, result) in self.handlers.iter().zip(results) {
            if let Err(e) = result {
                warn!("{} failed on handler {}: {}", operation, handler.name(), e);
            }
        }
    }
}

#[async_trait]
impl CacheHandler for CompositeHandler {
    fn name(&self) -> &str {
        "composite"
    }

    /// A failing handler does not hide a hit further down the list. When
    /// nothing hits, the first error is returned.
    async fn get(&self, key: &str, ctx: &GetContext) -> Result<Option<CacheEntry>> {
        let mut first_err = None;

        for handler in &self.handlers {
            match handler.get(key, ctx).await {
                Ok(Some(entry)) => {
                    debug!("Composite hit for key {} on handler {}", key, handler.name());
                    return Ok(Some(entry));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("get failed on handler {} for key {}: {}", handler.name(), key, e);
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let index = (self.set_strategy)(entry);
        let handler = self.handlers.get(index).ok_or_else(|| {
            CacheError::InvalidConfiguration(format!(
                "set strategy chose handler {} but only {} exist",
                index,
                self.handlers.len()
            ))
        })?;
        handler.set(key, entry).await
    }

    async fn revalidate_tag(&self, tag: &str) -> Result<()> {
        let results = join_all(self.handlers.iter().map(|h| h.revalidate_tag(tag))).await;
        self.log_failures("revalidate_tag", &results);
        first_error(results)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let results = join_all(self.handlers.iter().map(|h| h.delete(key))).await;
        self.log_failures("delete", &results);
        first_error(results)
    }
}
