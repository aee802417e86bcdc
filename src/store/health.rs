//! Readiness tracking for remote stores
//!
//! Call outcomes feed a shared flag: connection-level failures mark the
//! store unhealthy and any success marks it healthy again. A handler that
//! fails fast while unhealthy sends no traffic, so a [`HealthCheck`] task
//! keeps probing in the background and is the path back to ready.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use redis::{RedisError, RedisResult};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub(crate) struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub(crate) fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn mark(&self, ready: bool) {
        let was = self.ready.swap(ready, Ordering::SeqCst);
        match (was, ready) {
            (false, true) => debug!("Redis connection healthy again"),
            (true, false) => warn!("Redis connection lost; marking store not ready"),
            _ => {}
        }
    }

    /// Update readiness from a command outcome and convert the error.
    pub(crate) fn observe<T>(&self, result: RedisResult<T>) -> Result<T> {
        match result {
            Ok(v) => {
                self.mark(true);
                Ok(v)
            }
            Err(e) => {
                if is_connection_error(&e) {
                    warn!("Redis connection error: {}", e);
                    self.mark(false);
                }
                Err(e.into())
            }
        }
    }
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error() || e.is_connection_refusal()
}

/// Background readiness check, stopped when dropped
#[derive(Debug)]
pub struct HealthCheck {
    task: JoinHandle<()>,
}

impl HealthCheck {
    /// Run `ping` every `interval`. A ping that fails or does not answer
    /// within one interval marks the store not ready.
    pub(crate) fn spawn<F, Fut>(readiness: Readiness, interval: Duration, mut ping: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = RedisResult<()>> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match tokio::time::timeout(interval, ping()).await {
                    Ok(Ok(())) => readiness.mark(true),
                    Ok(Err(e)) => {
                        debug!("Health check failed: {}", e);
                        readiness.mark(false);
                    }
                    Err(_) => {
                        debug!("Health check timed out after {:?}", interval);
                        readiness.mark(false);
                    }
                }
            }
        });
        Self { task }
    }
}

impl Drop for HealthCheck {
    fn drop(&mut self) {
        self.task.abort();
    }
}
