//! Storage shared between tabs, with change notifications.
//!
//! Every tab gets its own `TabStorage` over the same backend. A write through
//! one tab is delivered as a `StorageEvent` to every other tab, never to the
//! writer, and only when the stored value actually changed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use super::backend::{MemoryBackend, StorageBackend, StorageError};

/// Buffer size for pending change notifications per tab.
/// A tab that falls further behind than this loses the oldest events.
const EVENT_BUFFER_SIZE: usize = 64;

pub type TabId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    pub origin: TabId,
}

#[derive(Clone)]
pub struct StorageHub {
    backend: Arc<dyn StorageBackend>,
    events: broadcast::Sender<StorageEvent>,
    next_tab: Arc<AtomicU64>,
}

impl StorageHub {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            backend,
            events,
            next_tab: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open a new tab on the shared storage.
    pub fn tab(&self) -> TabStorage {
        TabStorage {
            id: self.next_tab.fetch_add(1, Ordering::Relaxed),
            backend: Arc::clone(&self.backend),
            events: self.events.clone(),
        }
    }
}

/// One tab's handle on the shared storage.
#[derive(Clone)]
pub struct TabStorage {
    id: TabId,
    backend: Arc<dyn StorageBackend>,
    events: broadcast::Sender<StorageEvent>,
}

impl TabStorage {
    /// A lone tab over `backend`; nothing else will see its events.
    pub fn standalone(backend: Arc<dyn StorageBackend>) -> Self {
        StorageHub::new(backend).tab()
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    /// Change notifications written by other tabs from now on.
    pub fn subscribe(&self) -> TabEvents {
        TabEvents {
            tab: self.id,
            rx: self.events.subscribe(),
        }
    }

    fn publish(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        if old_value == new_value {
            return;
        }
        // No receivers just means no other tab is listening
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value,
            origin: self.id,
        });
    }
}

impl StorageBackend for TabStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backend.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let old = self.backend.get_item(key).ok().flatten();
        self.backend.set_item(key, value)?;
        self.publish(key, old, Some(value.to_string()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let old = self.backend.get_item(key).ok().flatten();
        self.backend.remove_item(key)?;
        self.publish(key, old, None);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.backend.keys()
    }
}

pub struct TabEvents {
    tab: TabId,
    rx: broadcast::Receiver<StorageEvent>,
}

impl TabEvents {
    /// Wait for the next event from another tab. `None` once every tab
    /// handle is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.tab => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(tab = self.tab, skipped = skipped, "Storage events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered event from another tab, if any.
    pub fn try_recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.origin == self.tab => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(tab = self.tab, skipped = skipped, "Storage events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
