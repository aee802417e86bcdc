use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{HashScan, KeyValueStore};
use crate::abort::{AbortSignal, with_abort_signal};
use crate::error::Result;

/// Decorator bounding every call on the inner store with a fresh timeout.
///
/// An optional shutdown token aborts all in-flight calls at once. Calls run
/// on their own task with owned arguments, so an abandoned call still
/// completes against the inner store.
pub struct TimeoutStore<S: KeyValueStore> {
    inner: Arc<S>,
    timeout: Duration,
    shutdown: Option<CancellationToken>,
}

impl<S: KeyValueStore> Clone for TimeoutStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            timeout: self.timeout,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: KeyValueStore> TimeoutStore<S> {
    pub fn new(inner: Arc<S>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            shutdown: None,
        }
    }

    /// Abort in-flight and future calls once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    fn signal(&self) -> AbortSignal {
        let signal = AbortSignal::timeout(self.timeout);
        match &self.shutdown {
            Some(token) => signal.with_token(token.clone()),
            None => signal,
        }
    }

    async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        with_abort_signal(move || operation(inner), Some(&self.signal())).await
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for TimeoutStore<S> {
    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_owned();
        self.call(move |s| async move { s.get(&key).await }).await
    }

    async fn set(&self, key: &str, value: &str, expire_at: Option<i64>) -> Result<()> {
        let (key, value) = (key.to_owned(), value.to_owned());
        self.call(move |s| async move { s.set(&key, &value, expire_at).await })
            .await
    }

    async fn expire_at(&self, key: &str, unix_secs: i64) -> Result<bool> {
        let key = key.to_owned();
        self.call(move |s| async move { s.expire_at(&key, unix_secs).await })
            .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = key.to_owned();
        self.call(move |s| async move { s.exists(&key).await }).await
    }

    async fn unlink(&self, keys: &[String]) -> Result<u64> {
        let keys = keys.to_vec();
        self.call(move |s| async move { s.unlink(&keys).await }).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let (key, field, value) = (key.to_owned(), field.to_owned(), value.to_owned());
        self.call(move |s| async move { s.hset(&key, &field, &value).await })
            .await
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let (key, field) = (key.to_owned(), field.to_owned());
        self.call(move |s| async move { s.hexists(&key, &field).await })
            .await
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        let (key, fields) = (key.to_owned(), fields.to_vec());
        self.call(move |s| async move { s.hmget(&key, &fields).await })
            .await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        let (key, fields) = (key.to_owned(), fields.to_vec());
        self.call(move |s| async move { s.hdel(&key, &fields).await })
            .await
    }

    async fn hscan(&self, key: &str, cursor: u64, count: usize) -> Result<HashScan> {
        let key = key.to_owned();
        self.call(move |s| async move { s.hscan(&key, cursor, count).await })
            .await
    }
}
