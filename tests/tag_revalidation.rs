//! End-to-end behavior of the tag-indexed handler over the in-memory store.
//!
//! Covers the read/write/revalidate protocol, implicit tag timestamps, the
//! expired-row sweep and the composite routing in front of it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde_json::json;

use tagcache::{
    AppPageValue, CacheEntry, CacheHandler, CacheValue, CompositeHandler, GetContext,
    KeyValueStore, Lifespan, LocalLruHandler, LruConfig, MemoryStore, RedisStringsConfig,
    RedisStringsHandler, RouteValue,
};

// =============================================================================
// Helpers
// =============================================================================

const TAGS: &str = "__sharedTags__";
const TTL: &str = "__sharedTagsTtl__";

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn fetch_entry(tags: &[&str], last_modified: i64) -> CacheEntry {
    CacheEntry::new(
        CacheValue::Other(json!({"kind": "FETCH", "data": {"modified": last_modified}})),
        tags.iter().map(|t| t.to_string()).collect(),
        last_modified,
    )
}

fn handler_with_clock(
    store: &Arc<MemoryStore>,
    clock: Arc<AtomicI64>,
) -> RedisStringsHandler<MemoryStore> {
    RedisStringsHandler::new(Arc::clone(store), RedisStringsConfig::default())
        .unwrap()
        .with_clock(move || clock.load(Ordering::SeqCst))
}

fn handler(store: &Arc<MemoryStore>) -> RedisStringsHandler<MemoryStore> {
    RedisStringsHandler::new(Arc::clone(store), RedisStringsConfig::default()).unwrap()
}

// =============================================================================
// Read / write protocol
// =============================================================================

#[tokio::test]
async fn binary_payload_round_trips_through_set_and_get() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler(&store);

    let mut segments = BTreeMap::new();
    segments.insert("/a".to_owned(), Bytes::from_static(&[0, 159, 146, 150]));
    let page = CacheEntry::new(
        CacheValue::AppPage(AppPageValue {
            html: "<p>hi</p>".into(),
            rsc_data: Some(Bytes::from_static(b"0:[\"$\",\"div\"]")),
            segment_data: Some(segments),
            postponed: Some("state".into()),
            headers: None,
            status: Some(200),
        }),
        vec!["page".into()],
        1000,
    );
    let route = CacheEntry::new(
        CacheValue::AppRoute(RouteValue {
            body: Some(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef])),
            status: 201,
            headers: serde_json::Map::new(),
        }),
        vec![],
        1000,
    );

    handler.set("page", &page).await.unwrap();
    handler.set("route", &route).await.unwrap();

    let ctx = GetContext::default();
    assert_eq!(handler.get("page", &ctx).await.unwrap(), Some(page));
    assert_eq!(handler.get("route", &ctx).await.unwrap(), Some(route));
}

#[tokio::test]
async fn revalidated_tag_misses_until_rewritten() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler(&store);
    let ctx = GetContext::default();

    let v1 = fetch_entry(&["a", "b"], 1000);
    handler.set("k1", &v1).await.unwrap();
    assert_eq!(handler.get("k1", &ctx).await.unwrap(), Some(v1));

    handler.revalidate_tag("a").await.unwrap();
    assert!(handler.get("k1", &ctx).await.unwrap().is_none());
    assert!(!store.hexists(TAGS, "k1").await.unwrap());

    let v2 = fetch_entry(&["b"], 2000);
    handler.set("k1", &v2).await.unwrap();
    assert_eq!(handler.get("k1", &ctx).await.unwrap(), Some(v2));
}

#[tokio::test]
async fn revalidation_leaves_other_tags_alone() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler(&store);
    let ctx = GetContext::default();

    handler.set("posts", &fetch_entry(&["posts"], 1)).await.unwrap();
    handler.set("users", &fetch_entry(&["users"], 1)).await.unwrap();
    handler.set("untagged", &fetch_entry(&[], 1)).await.unwrap();

    handler.revalidate_tag("posts").await.unwrap();

    assert!(handler.get("posts", &ctx).await.unwrap().is_none());
    assert!(handler.get("users", &ctx).await.unwrap().is_some());
    assert!(handler.get("untagged", &ctx).await.unwrap().is_some());
}

// =============================================================================
// Implicit tags
// =============================================================================

#[tokio::test]
async fn implicit_tag_timestamp_is_recorded_without_matches() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(AtomicI64::new(5000));
    let handler = handler_with_clock(&store, Arc::clone(&clock));

    handler.revalidate_tag("_N_T_/x").await.unwrap();
    let recorded = store
        .hmget("__revalidated_tags__", &["_N_T_/x".to_owned()])
        .await
        .unwrap();
    assert_eq!(recorded, vec![Some("5000".to_owned())]);

    handler.set("k2", &fetch_entry(&[], 4000)).await.unwrap();

    let ctx = GetContext::with_implicit_tags(["_N_T_/x"]);
    assert!(handler.get("k2", &ctx).await.unwrap().is_none());
    // the stale entry was evicted by the read
    assert!(store.get("k2").await.unwrap().is_none());
}

#[tokio::test]
async fn implicit_tag_spares_newer_entries_and_other_requests() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(AtomicI64::new(5000));
    let handler = handler_with_clock(&store, Arc::clone(&clock));

    handler.revalidate_tag("_N_T_/blog").await.unwrap();

    handler.set("new", &fetch_entry(&[], 6000)).await.unwrap();
    handler.set("old", &fetch_entry(&[], 4000)).await.unwrap();

    let blog = GetContext::with_implicit_tags(["_N_T_/blog"]);
    let other = GetContext::with_implicit_tags(["_N_T_/about"]);

    assert!(handler.get("new", &blog).await.unwrap().is_some());
    assert!(handler.get("old", &other).await.unwrap().is_some());
    assert!(handler.get("old", &blog).await.unwrap().is_none());
}

#[tokio::test]
async fn later_implicit_revalidation_supersedes_earlier() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(AtomicI64::new(1000));
    let handler = handler_with_clock(&store, Arc::clone(&clock));
    let ctx = GetContext::with_implicit_tags(["_N_T_/"]);

    handler.set("k", &fetch_entry(&[], 1500)).await.unwrap();
    handler.revalidate_tag("_N_T_/").await.unwrap();
    assert!(handler.get("k", &ctx).await.unwrap().is_some());

    clock.store(2000, Ordering::SeqCst);
    handler.revalidate_tag("_N_T_/").await.unwrap();
    assert!(handler.get("k", &ctx).await.unwrap().is_none());
}

// =============================================================================
// Expired index rows
// =============================================================================

#[tokio::test]
async fn expired_rows_are_swept_by_any_revalidation() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler(&store);

    let expired = fetch_entry(&["keep-me"], 1).with_lifespan(Lifespan::expiring_at(now_secs() - 60));
    let live = fetch_entry(&["keep-me"], 1).with_lifespan(Lifespan::expiring_at(now_secs() + 3600));
    handler.set("expired", &expired).await.unwrap();
    handler.set("live", &live).await.unwrap();

    assert!(store.hexists(TAGS, "expired").await.unwrap());
    assert!(store.hexists(TTL, "expired").await.unwrap());

    handler.revalidate_tag("unrelated").await.unwrap();

    assert!(!store.hexists(TAGS, "expired").await.unwrap());
    assert!(!store.hexists(TTL, "expired").await.unwrap());
    assert!(store.hexists(TAGS, "live").await.unwrap());
    assert!(store.hexists(TTL, "live").await.unwrap());
    assert!(
        handler
            .get("live", &GetContext::default())
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn sweep_can_run_on_its_own() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler(&store);

    for i in 0..3 {
        let entry = fetch_entry(&[], 1).with_lifespan(Lifespan::expiring_at(now_secs() - 1));
        handler.set(&format!("k{}", i), &entry).await.unwrap();
    }

    assert_eq!(handler.sweep_expired().await.unwrap(), 3);
    assert_eq!(store.hlen(TAGS), 0);
    assert_eq!(store.hlen(TTL), 0);
    assert_eq!(handler.sweep_expired().await.unwrap(), 0);
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn delete_is_idempotent_and_leaves_no_rows() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler(&store);

    let entry = fetch_entry(&["a"], 1).with_lifespan(Lifespan::expiring_at(now_secs() + 3600));
    handler.set("k", &entry).await.unwrap();

    handler.delete("k").await.unwrap();
    handler.delete("k").await.unwrap();

    assert!(store.get("k").await.unwrap().is_none());
    assert!(!store.hexists(TAGS, "k").await.unwrap());
    assert!(!store.hexists(TTL, "k").await.unwrap());
    assert!(
        handler
            .get("k", &GetContext::default())
            .await
            .unwrap()
            .is_none()
    );
}

// =============================================================================
// Composite in front of the remote tier
// =============================================================================

#[tokio::test]
async fn composite_invalidation_reaches_both_tiers() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(handler(&store));
    let local = Arc::new(LocalLruHandler::new(LruConfig::default()));

    let composite = CompositeHandler::new(vec![
        local.clone() as Arc<dyn CacheHandler>,
        remote.clone() as Arc<dyn CacheHandler>,
    ])
    .unwrap()
    .with_set_strategy(|entry| if entry.has_tag("shared") { 1 } else { 0 });
    let ctx = GetContext::default();

    composite.set("local-only", &fetch_entry(&["t"], 1)).await.unwrap();
    composite
        .set("remote-only", &fetch_entry(&["t", "shared"], 1))
        .await
        .unwrap();

    assert!(composite.get("local-only", &ctx).await.unwrap().is_some());
    assert!(composite.get("remote-only", &ctx).await.unwrap().is_some());
    assert!(store.get("local-only").await.unwrap().is_none());

    composite.revalidate_tag("t").await.unwrap();

    assert!(composite.get("local-only", &ctx).await.unwrap().is_none());
    assert!(composite.get("remote-only", &ctx).await.unwrap().is_none());
}
