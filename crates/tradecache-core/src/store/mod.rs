//! Durable, TTL-aware local storage.
//!
//! This module provides the `OfflineStore` for keeping API data and UI
//! state readable while the device is offline. Records are wrapped as
//! `{data, timestamp, expiresAt?}` JSON and expire lazily on read.
//!
//! The host storage itself sits behind `StorageBackend`:
//! - `FileBackend`: one JSON file per key under the cache directory
//! - `MemoryBackend`: in-process map with an optional byte quota
//! - `TabStorage`: a per-tab view of a `StorageHub` that notifies the other
//!   tabs of every change

pub mod backend;
pub mod hub;
pub mod manager;
pub mod policy;
pub mod record;

pub use backend::{FileBackend, MemoryBackend, StorageBackend, StorageError};
pub use hub::{StorageEvent, StorageHub, TabEvents, TabId, TabStorage};
pub use manager::OfflineStore;
pub use policy::TtlPolicy;
pub use record::StoredRecord;
