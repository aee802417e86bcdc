//! Entry lifespans
//!
//! A lifespan is derived from the entry's modification time and its
//! revalidate period. The expire age comes from a user-supplied estimator
//! whose output is validated before use.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{CacheError, error::Result};

pub const MAX_INT32: i64 = 2_147_483_647;

/// Timing parameters of an entry, all in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifespan {
    #[serde(default)]
    pub last_modified_at: i64,
    #[serde(default)]
    pub stale_at: i64,
    pub expire_at: i64,
    #[serde(default)]
    pub stale_age: i64,
    #[serde(default)]
    pub expire_age: i64,
    /// `None` means the entry never revalidates
    #[serde(default)]
    pub revalidate: Option<i64>,
}

impl Lifespan {
    /// Lifespan that only carries an absolute expiry.
    pub fn expiring_at(expire_at: i64) -> Self {
        Self {
            last_modified_at: 0,
            stale_at: expire_at,
            expire_at,
            stale_age: 0,
            expire_age: 0,
            revalidate: None,
        }
    }

    /// Compute a lifespan for an entry modified at `last_modified_ms`.
    ///
    /// `revalidate` of `None` means "never stale", which maps to
    /// [`MAX_INT32`] seconds.
    pub fn new(
        last_modified_ms: i64,
        revalidate: Option<i64>,
        estimator: &ExpireAgeEstimator,
    ) -> Result<Self> {
        let last_modified_at = last_modified_ms.div_euclid(1000);
        let stale_age = revalidate.unwrap_or(MAX_INT32);
        let expire_age = estimator.estimate(stale_age)?;

        Ok(Self {
            last_modified_at,
            stale_at: last_modified_at.saturating_add(stale_age),
            expire_at: last_modified_at.saturating_add(expire_age),
            stale_age,
            expire_age,
            revalidate,
        })
    }

    pub fn is_expired(&self, now_secs: i64) -> bool {
        now_secs > self.expire_at
    }

    pub fn is_stale(&self, now_secs: i64) -> bool {
        now_secs > self.stale_at
    }
}

type EstimateFn = dyn Fn(f64) -> f64 + Send + Sync;

/// Validated stale-age to expire-age mapping
///
/// The raw output is floored and capped at [`MAX_INT32`]; NaN and values
/// that end up below one second are rejected.
#[derive(Clone)]
pub struct ExpireAgeEstimator {
    f: Arc<EstimateFn>,
}

impl ExpireAgeEstimator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn estimate(&self, stale_age: i64) -> Result<i64> {
        let raw = (self.f)(stale_age as f64);
        let age = raw.floor();

        if age.is_nan() || age < 1.0 {
            return Err(CacheError::InvalidConfiguration(format!(
                "The expire age must be a positive integer but got {}",
                raw
            )));
        }

        Ok(if age >= MAX_INT32 as f64 {
            MAX_INT32
        } else {
            age as i64
        })
    }
}

impl Default for ExpireAgeEstimator {
    fn default() -> Self {
        Self::new(|stale_age| stale_age * 1.5)
    }
}

impl fmt::Debug for ExpireAgeEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpireAgeEstimator").finish_non_exhaustive()
    }
}
