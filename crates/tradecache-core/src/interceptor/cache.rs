//! Durable response partitions.
//!
//! Each partition is an index record (`<storage name>#index`, keys oldest
//! first) plus one record per response, all kept in a `StorageBackend` so a
//! `FileBackend` under the cache directory survives reloads and is visible
//! to every tab opened over the same directory.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::namespace::CacheNamespace;
use super::request::{Response, ResponseKind};
use crate::clock::duration_ms;
use crate::store::{FileBackend, MemoryBackend, StorageBackend, StorageError};

const INDEX_SUFFIX: &str = "#index";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PartitionIndex {
    /// Oldest first.
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    key: String,
    slot: String,
    stored_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredResponse {
    /// Cache key the slot was written for; slots are hashed.
    key: String,
    status: u16,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
    url: Option<String>,
    kind: ResponseKind,
}

impl StoredResponse {
    fn capture(key: &str, response: &Response) -> Self {
        Self {
            key: key.to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                .collect(),
            body: response.body.clone(),
            url: response.url.as_ref().map(|url| url.to_string()),
            kind: response.kind,
        }
    }

    fn restore(self) -> Option<Response> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                headers.append(name, value);
            }
        }
        Some(Response {
            status,
            headers,
            body: self.body,
            url: self.url.and_then(|url| Url::parse(&url).ok()),
            kind: self.kind,
        })
    }
}

/// Every stored partition, keyed by storage name.
///
/// Backend failures never reach the interceptor: a failed write is logged
/// and the response simply isn't cached, a failed read is a miss.
pub struct CacheStorage {
    backend: Arc<dyn StorageBackend>,
    /// Serializes index read-modify-write within this process.
    guard: Mutex<()>,
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStorage {
    /// Partitions that live as long as this value.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            guard: Mutex::new(()),
        }
    }

    /// Partitions stored as files under `dir`.
    pub fn open(dir: PathBuf) -> Result<Self, StorageError> {
        Ok(Self::with_backend(Arc::new(FileBackend::new(dir)?)))
    }

    /// Store `response` under `key`, trimming the oldest entries past the
    /// namespace's limit.
    pub fn put(&self, namespace: &CacheNamespace, key: &str, response: Response, now_ms: i64) {
        let _guard = self.lock();
        let name = namespace.storage_name();
        let mut index = self.read_index(&name).unwrap_or_default();

        let slot = slot_key(&name, key);
        if let Err(e) = self.write_json(&slot, &StoredResponse::capture(key, &response)) {
            warn!(cache = %name, key = key, error = %e, "Failed to store cached response");
            return;
        }

        index.entries.retain(|entry| entry.key != key);
        index.entries.push(IndexEntry {
            key: key.to_string(),
            slot,
            stored_at: now_ms,
        });
        while index.entries.len() > namespace.max_entries {
            let oldest = index.entries.remove(0);
            self.release_slot(&index, &oldest);
            debug!(cache = %name, key = %oldest.key, "Trimmed cache entry");
        }
        self.write_index(&name, &index);
    }

    /// The stored response for `key`, unless it has outlived `max_age`.
    pub fn lookup(&self, namespace: &CacheNamespace, key: &str, now_ms: i64) -> Option<Response> {
        let _guard = self.lock();
        let name = namespace.storage_name();
        let mut index = self.read_index(&name)?;
        let position = index.entries.iter().position(|entry| entry.key == key)?;

        if now_ms - index.entries[position].stored_at > duration_ms(namespace.max_age) {
            let expired = index.entries.remove(position);
            self.release_slot(&index, &expired);
            self.write_index(&name, &index);
            debug!(cache = %name, key = key, "Cache entry past max age");
            return None;
        }

        let raw = match self.backend.get_item(&index.entries[position].slot) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(cache = %name, key = key, error = %e, "Failed to read cached response");
                return None;
            }
        };
        let stored: StoredResponse = serde_json::from_str(&raw).ok()?;
        if stored.key != key {
            return None;
        }
        stored.restore()
    }

    pub fn contains(&self, namespace: &CacheNamespace, key: &str) -> bool {
        let _guard = self.lock();
        self.read_index(&namespace.storage_name())
            .is_some_and(|index| index.entries.iter().any(|entry| entry.key == key))
    }

    pub fn len(&self, namespace: &CacheNamespace) -> usize {
        let _guard = self.lock();
        self.read_index(&namespace.storage_name())
            .map_or(0, |index| index.entries.len())
    }

    /// Storage names of every partition, sorted.
    pub fn names(&self) -> Vec<String> {
        let keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list cache partitions");
                return Vec::new();
            }
        };
        let mut names: Vec<String> = keys
            .iter()
            .filter_map(|key| key.strip_suffix(INDEX_SUFFIX))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Drop a whole partition. Returns whether it existed.
    pub fn delete(&self, storage_name: &str) -> bool {
        let _guard = self.lock();
        let Some(index) = self.read_index(storage_name) else {
            return false;
        };
        for entry in &index.entries {
            if let Err(e) = self.backend.remove_item(&entry.slot) {
                warn!(cache = storage_name, error = %e, "Failed to remove cached response");
            }
        }
        if let Err(e) = self.backend.remove_item(&index_key(storage_name)) {
            warn!(cache = storage_name, error = %e, "Failed to remove cache partition");
        }
        true
    }

    fn read_index(&self, storage_name: &str) -> Option<PartitionIndex> {
        let raw = match self.backend.get_item(&index_key(storage_name)) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(cache = storage_name, error = %e, "Failed to read cache index");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!(cache = storage_name, error = %e, "Corrupt cache index, starting over");
                Some(PartitionIndex::default())
            }
        }
    }

    fn write_index(&self, storage_name: &str, index: &PartitionIndex) {
        if let Err(e) = self.write_json(&index_key(storage_name), index) {
            warn!(cache = storage_name, error = %e, "Failed to write cache index");
        }
    }

    /// Remove `entry`'s slot unless a remaining entry shares it.
    fn release_slot(&self, index: &PartitionIndex, entry: &IndexEntry) {
        if index.entries.iter().any(|other| other.slot == entry.slot) {
            return;
        }
        if let Err(e) = self.backend.remove_item(&entry.slot) {
            warn!(key = %entry.key, error = %e, "Failed to remove cached response");
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)?;
        self.backend.set_item(key, &json)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn index_key(storage_name: &str) -> String {
    format!("{}{}", storage_name, INDEX_SUFFIX)
}

/// Backend key of the response stored for `key`. URLs can be longer than a
/// file name may be, so the key is hashed (FNV-1a).
fn slot_key(storage_name: &str, key: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{}#{:016x}", storage_name, hash)
}
