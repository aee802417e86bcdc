//! Payload normalization
//!
//! Binary fields cannot travel through a string store as-is. Before a write
//! every binary field is replaced by its standard Base64 encoding; after a
//! read the encoding is reversed. Kinds without binary fields are copied
//! verbatim in both directions.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entry::{AppPageValue, CacheEntry, CacheValue, RouteValue, WireEntry};
use crate::error::Result;

#[derive(Serialize, Deserialize)]
struct WireRoute {
    body: Option<String>,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    headers: Map<String, Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAppPage {
    #[serde(default)]
    html: String,
    rsc_data: Option<String>,
    segment_data: Option<BTreeMap<String, String>>,
    postponed: Option<String>,
    headers: Option<Map<String, Value>>,
    status: Option<u16>,
}

fn encode(bytes: &Bytes) -> String {
    STANDARD.encode(bytes)
}

fn decode(s: &str) -> Result<Bytes> {
    Ok(Bytes::from(STANDARD.decode(s)?))
}

fn with_kind(value: Value, kind: &str) -> Value {
    match value {
        Value::Object(mut map) => {
            map.insert("kind".to_owned(), Value::String(kind.to_owned()));
            Value::Object(map)
        }
        other => other,
    }
}

/// Produce the wire-safe JSON form of `value`. The input is left untouched.
pub fn normalize(value: &CacheValue) -> Result<Value> {
    let json = match value {
        CacheValue::AppRoute(route) => with_kind(
            serde_json::to_value(WireRoute {
                body: route.body.as_ref().map(encode),
                status: route.status,
                headers: route.headers.clone(),
            })?,
            CacheValue::APP_ROUTE,
        ),
        CacheValue::AppPage(page) => with_kind(
            serde_json::to_value(WireAppPage {
                html: page.html.clone(),
                rsc_data: page.rsc_data.as_ref().map(encode),
                segment_data: page.segment_data.as_ref().map(|segments| {
                    segments
                        .iter()
                        .map(|(path, data)| (path.clone(), encode(data)))
                        .collect()
                }),
                postponed: page.postponed.clone(),
                headers: page.headers.clone(),
                status: page.status,
            })?,
            CacheValue::APP_PAGE,
        ),
        CacheValue::Other(other) => other.clone(),
    };
    Ok(json)
}

/// Rebuild a typed payload from its wire form.
pub fn denormalize(value: Value) -> Result<CacheValue> {
    let kind = value.get("kind").and_then(Value::as_str);

    match kind {
        Some(CacheValue::APP_ROUTE) => {
            let wire: WireRoute = serde_json::from_value(value)?;
            Ok(CacheValue::AppRoute(RouteValue {
                body: wire.body.as_deref().map(decode).transpose()?,
                status: wire.status,
                headers: wire.headers,
            }))
        }
        Some(CacheValue::APP_PAGE) => {
            let wire: WireAppPage = serde_json::from_value(value)?;
            let segment_data = match wire.segment_data {
                Some(segments) => Some(
                    segments
                        .into_iter()
                        .map(|(path, data)| decode(&data).map(|bytes| (path, bytes)))
                        .collect::<Result<BTreeMap<_, _>>>()?,
                ),
                None => None,
            };
            Ok(CacheValue::AppPage(AppPageValue {
                html: wire.html,
                rsc_data: wire.rsc_data.as_deref().map(decode).transpose()?,
                segment_data,
                postponed: wire.postponed,
                headers: wire.headers,
                status: wire.status,
            }))
        }
        _ => Ok(CacheValue::Other(value)),
    }
}

/// Serialize an entry for the primary store.
pub(crate) fn encode_entry(entry: &CacheEntry) -> Result<String> {
    let wire = WireEntry {
        value: entry.value.as_ref().map(normalize).transpose()?,
        tags: entry.tags.clone(),
        last_modified: entry.last_modified,
        lifespan: entry.lifespan.clone(),
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Parse an entry read from the primary store.
pub(crate) fn decode_entry(json: &str) -> Result<CacheEntry> {
    let wire: WireEntry = serde_json::from_str(json)?;
    Ok(CacheEntry {
        value: wire.value.map(denormalize).transpose()?,
        tags: wire.tags,
        last_modified: wire.last_modified,
        lifespan: wire.lifespan,
    })
}
