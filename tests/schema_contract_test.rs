//! JSON Schema Contract Tests
//!
//! The persisted cache-entry layout and the serialized sync status are read
//! by other processes (older app versions, UI bridges). These tests pin both
//! to the schemas under `schemas/`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use jsonschema::Validator;
use serde_json::{Value, json};

use dayline::core::{SourceSyncStatus, SyncState, SyncStatus, compute_status};
use dayline::storage::cache::{CACHE_NAMESPACE, CacheEntry, CacheStore};
use dayline::storage::kv::{KeyValueStore, MemoryStore};

fn load_schema(source: &str) -> Validator {
    let schema: Value = serde_json::from_str(source).expect("Schema should be valid JSON");
    jsonschema::validator_for(&schema).expect("Schema should compile")
}

fn cache_entry_schema() -> Validator {
    load_schema(include_str!("../schemas/cache-entry.schema.json"))
}

fn sync_status_schema() -> Validator {
    load_schema(include_str!("../schemas/sync-status.schema.json"))
}

// =============================================================================
// Cache Entry
// =============================================================================

#[test]
fn persisted_cache_entry_matches_schema() {
    let kv = Arc::new(MemoryStore::new());
    let cache = CacheStore::with_store(kv.clone());
    cache
        .set("plan:today", &json!({"blocks": [{"title": "Focus"}]}), Duration::from_secs(1800))
        .unwrap();

    let raw = kv
        .get(&format!("{CACHE_NAMESPACE}plan:today"))
        .unwrap()
        .expect("entry is stored under the cache namespace");
    let persisted: Value = serde_json::from_str(&raw).unwrap();

    let schema = cache_entry_schema();
    assert!(schema.is_valid(&persisted), "persisted entry: {persisted}");
    let cached_at = persisted["cachedAt"].as_i64().unwrap();
    let expires_at = persisted["expiresAt"].as_i64().unwrap();
    assert_eq!(expires_at - cached_at, 1_800_000);
}

#[test]
fn scalar_payloads_match_schema() {
    let schema = cache_entry_schema();
    let entry = CacheEntry::new(42_u64, Duration::from_secs(60), 1_760_000_000_000);
    assert!(schema.is_valid(&serde_json::to_value(&entry).unwrap()));
}

#[test]
fn snake_case_entry_fails_schema() {
    let schema = cache_entry_schema();
    let legacy = json!({"data": 1, "cached_at": 1, "expires_at": 2});
    assert!(!schema.is_valid(&legacy));
}

#[test]
fn entry_written_by_other_process_is_readable() {
    let kv = Arc::new(MemoryStore::new());
    let now = Utc::now().timestamp_millis();
    let foreign = json!({
        "data": {"unread": 9},
        "cachedAt": now,
        "expiresAt": now + 60_000
    });
    assert!(cache_entry_schema().is_valid(&foreign));
    kv.set(&format!("{CACHE_NAMESPACE}inbox:summary"), &foreign.to_string())
        .unwrap();

    let cache = CacheStore::with_store(kv);
    assert_eq!(
        cache.get_fresh::<Value>("inbox:summary"),
        Some(json!({"unread": 9}))
    );
}

// =============================================================================
// Sync Status
// =============================================================================

#[test]
fn default_status_matches_schema() {
    let value = serde_json::to_value(SyncStatus::default()).unwrap();
    assert!(sync_status_schema().is_valid(&value), "{value}");
}

#[test]
fn computed_status_matches_schema() {
    let mut sources = BTreeMap::new();
    sources.insert(
        "mail".to_string(),
        SourceSyncStatus {
            count: 12,
            last_synced: Some(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap()),
        },
    );
    sources.insert("calendar".to_string(), SourceSyncStatus::default());

    let status = compute_status(sources, Some("Sync failed: offline".to_string()));
    assert_eq!(status.state, SyncState::Error);

    let value = serde_json::to_value(&status).unwrap();
    assert!(sync_status_schema().is_valid(&value), "{value}");
    assert_eq!(value["state"], "error");
    assert_eq!(value["sources"]["calendar"]["last_synced"], Value::Null);
}

#[test]
fn unknown_state_fails_schema() {
    let invalid = json!({
        "state": "paused",
        "lastSyncAt": null,
        "error": null,
        "sources": {}
    });
    assert!(!sync_status_schema().is_valid(&invalid));
}
