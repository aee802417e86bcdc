//! Cache entry model
//!
//! [`CacheEntry`] is what the host hands to a handler. The payload is a
//! [`CacheValue`]: the kinds that carry binary fields are typed, every other
//! kind is kept as raw JSON and passed through untouched.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::lifespan::Lifespan;

/// Stored cache record
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Option<CacheValue>,
    pub tags: Vec<String>,
    /// Epoch milliseconds
    pub last_modified: i64,
    pub lifespan: Option<Lifespan>,
}

impl CacheEntry {
    pub fn new(value: CacheValue, tags: Vec<String>, last_modified: i64) -> Self {
        Self {
            value: Some(value),
            tags,
            last_modified,
            lifespan: None,
        }
    }

    pub fn with_lifespan(mut self, lifespan: Lifespan) -> Self {
        self.lifespan = Some(lifespan);
        self
    }

    /// Absolute expiry in unix seconds, if the entry has one
    pub fn expire_at(&self) -> Option<i64> {
        self.lifespan.as_ref().map(|l| l.expire_at)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Opaque payload, discriminated by its `kind`
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// `APP_ROUTE`: binary response body
    AppRoute(RouteValue),
    /// `APP_PAGE`: binary RSC payload and per-segment binaries
    AppPage(AppPageValue),
    /// Any other kind; carries no binary fields
    Other(serde_json::Value),
}

impl CacheValue {
    pub const APP_ROUTE: &'static str = "APP_ROUTE";
    pub const APP_PAGE: &'static str = "APP_PAGE";

    /// The `kind` discriminant, when present
    pub fn kind(&self) -> Option<&str> {
        match self {
            CacheValue::AppRoute(_) => Some(Self::APP_ROUTE),
            CacheValue::AppPage(_) => Some(Self::APP_PAGE),
            CacheValue::Other(v) => v.get("kind").and_then(|k| k.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteValue {
    pub body: Option<Bytes>,
    pub status: u16,
    pub headers: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppPageValue {
    pub html: String,
    pub rsc_data: Option<Bytes>,
    pub segment_data: Option<BTreeMap<String, Bytes>>,
    pub postponed: Option<String>,
    pub headers: Option<serde_json::Map<String, serde_json::Value>>,
    pub status: Option<u16>,
}

/// Context supplied by the host on reads
#[derive(Debug, Clone, Default)]
pub struct GetContext {
    /// Tags derived from the request path; honored through revalidation
    /// timestamps even though they are not stored with the entry
    pub implicit_tags: Vec<String>,
}

impl GetContext {
    pub fn with_implicit_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            implicit_tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

/// Stored JSON shape of an entry; binary fields are already encoded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEntry {
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub last_modified: i64,
    #[serde(default)]
    pub lifespan: Option<Lifespan>,
}
