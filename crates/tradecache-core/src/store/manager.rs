use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::backend::StorageBackend;
use super::policy::TtlPolicy;
use super::record::StoredRecord;
use crate::clock::Clock;

/// Typed, TTL-aware records over durable storage.
///
/// Writes never fail from the caller's point of view. When the backend
/// rejects one (quota, I/O) the serialized record is kept in memory for this
/// tab, so the session keeps working; it just won't survive a reload.
///
/// Clone is cheap and clones share the in-memory fallback.
#[derive(Clone)]
pub struct OfflineStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    policy: TtlPolicy,
    /// Records whose durable write failed, by key.
    shadow: Mutex<HashMap<String, String>>,
}

impl OfflineStore {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self::with_policy(backend, clock, TtlPolicy::default())
    }

    pub fn with_policy(
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        policy: TtlPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                clock,
                policy,
                shadow: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.inner.policy
    }

    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Write `value` under `key`, expiring `ttl` from now (never if `None`).
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let record = StoredRecord::new(value, self.now_ms(), ttl);
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to serialize record, not stored");
                return;
            }
        };

        match self.inner.backend.set_item(key, &raw) {
            Ok(()) => {
                self.shadow().remove(key);
            }
            Err(e) => {
                warn!(key = key, error = %e, "Durable write failed, keeping record in memory");
                self.shadow().insert(key.to_string(), raw);
            }
        }
    }

    /// Write with the TTL the policy table assigns to `key`.
    pub fn set_with_policy<T: Serialize>(&self, key: &str, value: &T) {
        let ttl = self.inner.policy.ttl_for(key);
        self.set(key, value, Some(ttl));
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_record(key).map(|record| record.data)
    }

    /// The live record under `key`. An expired record is deleted and
    /// reported as absent.
    pub fn get_record<T: DeserializeOwned>(&self, key: &str) -> Option<StoredRecord<T>> {
        let raw = self.read_raw(key)?;
        let record: StoredRecord<T> = match StoredRecord::from_json(&raw) {
            Ok(record) => record,
            Err(e) => {
                debug!(key = key, error = %e, "Unreadable record treated as absent");
                return None;
            }
        };

        if record.is_expired(self.now_ms()) {
            debug!(key = key, "Record expired, purging");
            self.remove(key);
            return None;
        }
        Some(record)
    }

    pub fn remove(&self, key: &str) {
        self.shadow().remove(key);
        if let Err(e) = self.inner.backend.remove_item(key) {
            warn!(key = key, error = %e, "Failed to remove record");
        }
    }

    /// Human-readable age of the live record under `key`.
    pub fn record_age(&self, key: &str) -> Option<String> {
        let record: StoredRecord<IgnoredAny> = self.get_record(key)?;
        Some(record.age_display(self.now_ms()))
    }

    /// Delete every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.now_ms();
        let mut keys = match self.inner.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list storage keys");
                Vec::new()
            }
        };
        keys.extend(self.shadow().keys().cloned());
        keys.sort();
        keys.dedup();

        let mut purged = 0;
        for key in keys {
            let Some(raw) = self.read_raw(&key) else { continue };
            // Keys not written by this store don't parse and are left alone
            let Ok(record) = StoredRecord::<IgnoredAny>::from_json(&raw) else { continue };
            if record.is_expired(now) {
                self.remove(&key);
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged = purged, "Purged expired records");
        }
        purged
    }

    /// Move `keys` out of a deprecated secondary storage into this store.
    ///
    /// A key this store already holds wins and the legacy copy is dropped.
    /// Legacy values that aren't records yet are wrapped in one with no
    /// expiry. Returns the number of values moved.
    pub fn migrate_from(&self, legacy: &dyn StorageBackend, keys: &[&str]) -> usize {
        let mut migrated = 0;
        for &key in keys {
            let raw = match legacy.get_item(key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = key, error = %e, "Failed to read legacy value");
                    continue;
                }
            };

            if self.read_raw(key).is_none() {
                if let Ok(record) = StoredRecord::<Value>::from_json(&raw) {
                    let ttl = record.expires_at.map(|at| {
                        Duration::from_millis(at.saturating_sub(record.timestamp).max(0) as u64)
                    });
                    self.write_record(key, &record.data, record.timestamp, ttl);
                    migrated += 1;
                } else if let Ok(value) = serde_json::from_str::<Value>(&raw) {
                    self.set(key, &value, None);
                    migrated += 1;
                } else {
                    warn!(key = key, "Legacy value is not JSON, dropping");
                }
            }

            if let Err(e) = legacy.remove_item(key) {
                warn!(key = key, error = %e, "Failed to remove legacy value");
            }
        }
        if migrated > 0 {
            info!(migrated = migrated, "Migrated legacy storage values");
        }
        migrated
    }

    /// Write a record keeping its original timestamp.
    fn write_record(&self, key: &str, data: &Value, timestamp: i64, ttl: Option<Duration>) {
        let record = StoredRecord::new(data, timestamp, ttl);
        match serde_json::to_string(&record) {
            Ok(raw) => {
                if let Err(e) = self.inner.backend.set_item(key, &raw) {
                    warn!(key = key, error = %e, "Durable write failed, keeping record in memory");
                    self.shadow().insert(key.to_string(), raw);
                }
            }
            Err(e) => warn!(key = key, error = %e, "Failed to serialize record, not stored"),
        }
    }

    fn read_raw(&self, key: &str) -> Option<String> {
        if let Some(raw) = self.shadow().get(key) {
            return Some(raw.clone());
        }
        match self.inner.backend.get_item(key) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(key = key, error = %e, "Failed to read record");
                None
            }
        }
    }

    fn shadow(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.inner.shadow.lock().unwrap_or_else(|e| e.into_inner())
    }
}
