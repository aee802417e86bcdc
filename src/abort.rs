//! Cancellable remote calls
//!
//! Every remote call made by the handlers runs through [`with_abort_signal`].
//! The signal can fire because its deadline passed (`CacheError::Timeout`) or
//! because its cancellation token was cancelled (`CacheError::Aborted`).
//!
//! Cancellation is cooperative: the caller stops waiting, but the operation
//! itself is never torn down halfway. It finishes in the background and its
//! result is dropped.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{CacheError, error::Result};

/// Cancellation signal attached to a single remote call
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: Option<CancellationToken>,
    deadline: Option<(Instant, Duration)>,
}

impl AbortSignal {
    /// Signal that fires once `timeout` has elapsed from now.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            token: None,
            deadline: Some((Instant::now() + timeout, timeout)),
        }
    }

    /// Signal driven by an external cancellation token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token: Some(token),
            deadline: None,
        }
    }

    /// Attach a cancellation token to an existing signal.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Whether the signal already fired.
    pub fn is_aborted(&self) -> bool {
        self.reason().is_some()
    }

    fn reason(&self) -> Option<CacheError> {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(CacheError::Aborted);
        }
        match self.deadline {
            Some((at, timeout)) if Instant::now() >= at => Some(CacheError::Timeout(timeout)),
            _ => None,
        }
    }

    async fn cancelled(&self) {
        match &self.token {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }

    async fn expired(&self) -> Duration {
        match self.deadline {
            Some((at, timeout)) => {
                tokio::time::sleep_until(at).await;
                timeout
            }
            None => std::future::pending().await,
        }
    }
}

/// Run `operation`, giving up as soon as `signal` fires.
///
/// Without a signal the operation runs unbounded. A signal that already fired
/// rejects without starting the operation. Otherwise the operation runs as
/// its own task: when the signal wins, the caller gets the error right away
/// and the task keeps running to completion with its result discarded. When
/// the operation and the signal become ready together, the operation's
/// outcome wins.
pub async fn with_abort_signal<T, F, Fut>(operation: F, signal: Option<&AbortSignal>) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let Some(signal) = signal else {
        return operation().await;
    };

    if let Some(reason) = signal.reason() {
        return Err(reason);
    }

    let task = tokio::spawn(operation());

    // Dropping the join handle detaches the task instead of cancelling it.
    tokio::select! {
        biased;
        joined = task => match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(CacheError::Aborted),
        },
        _ = signal.cancelled() => Err(CacheError::Aborted),
        timeout = signal.expired() => Err(CacheError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_without_signal_resolves() {
        let result = with_abort_signal(|| async { Ok::<_, CacheError>("success") }, None).await;
        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_without_signal_propagates_error() {
        let result: Result<()> = with_abort_signal(
            || async { Err(CacheError::Backend("test error".into())) },
            None,
        )
        .await;
        assert!(matches!(result, Err(CacheError::Backend(msg)) if msg == "test error"));
    }

    #[tokio::test]
    async fn test_operation_error_before_abort_is_kept() {
        let token = CancellationToken::new();
        let signal = AbortSignal::from_token(token.clone());

        let result: Result<()> = with_abort_signal(
            || async { Err(CacheError::Backend("promise error".into())) },
            Some(&signal),
        )
        .await;
        token.cancel();

        assert!(matches!(result, Err(CacheError::Backend(_))));
    }

    #[tokio::test]
    async fn test_already_aborted_never_runs_operation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        token.cancel();
        let signal = AbortSignal::from_token(token);

        let counter = Arc::clone(&calls);
        let result = with_abort_signal(
            || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Some(&signal),
        )
        .await;

        assert!(matches!(result, Err(CacheError::Aborted)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_during_operation() {
        let token = CancellationToken::new();
        let signal = AbortSignal::from_token(token.clone());

        tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                token.cancel();
            }
        });

        let result: Result<()> = with_abort_signal(
            || async {
                std::future::pending::<()>().await;
                Ok(())
            },
            Some(&signal),
        )
        .await;

        assert!(matches!(result, Err(CacheError::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires() {
        let signal = AbortSignal::timeout(Duration::from_millis(50));

        let result: Result<()> = with_abort_signal(
            || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Some(&signal),
        )
        .await;

        assert!(matches!(result, Err(CacheError::Timeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_beats_timeout() {
        let signal = AbortSignal::timeout(Duration::from_secs(1));

        let result = with_abort_signal(
            || async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok("quick success")
            },
            Some(&signal),
        )
        .await;

        assert_eq!(result.unwrap(), "quick success");
        assert!(!signal.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_rejects_immediately() {
        let signal = AbortSignal::timeout(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;

        assert!(signal.is_aborted());
        let result = with_abort_signal(|| async { Ok(()) }, Some(&signal)).await;
        assert!(matches!(result, Err(CacheError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_operation_still_completes() {
        let completed = Arc::new(AtomicUsize::new(0));
        let signal = AbortSignal::timeout(Duration::from_millis(10));

        let counter = Arc::clone(&completed);
        let result = with_abort_signal(
            || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Some(&signal),
        )
        .await;

        assert!(matches!(result, Err(CacheError::Timeout(_))));
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_aborted_operation_still_completes() {
        let completed = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let signal = AbortSignal::from_token(token.clone());
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let counter = Arc::clone(&completed);
        let canceller = token.clone();
        let (result, ()) = tokio::join!(
            with_abort_signal(
                || async move {
                    let _ = released.await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                Some(&signal),
            ),
            async move {
                tokio::task::yield_now().await;
                canceller.cancel();
            }
        );
        assert!(matches!(result, Err(CacheError::Aborted)));
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        let _ = release.send(());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_reusable_after_settlement() {
        let token = CancellationToken::new();
        let signal = AbortSignal::timeout(Duration::from_secs(5)).with_token(token.clone());

        for i in 0..3 {
            let result = with_abort_signal(|| async move { Ok(i) }, Some(&signal)).await;
            assert_eq!(result.unwrap(), i);
        }

        token.cancel();
        let result = with_abort_signal(|| async { Ok(()) }, Some(&signal)).await;
        assert!(matches!(result, Err(CacheError::Aborted)));
    }
}
