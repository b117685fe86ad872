#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use tradecache_core::api::{ApiError, PreferencesApi};
use tradecache_core::clock::ManualClock;
use tradecache_core::interceptor::{FetchError, Fetcher, Request, Response};
use tradecache_core::models::{ChartSettings, RemotePreference};
use tradecache_core::store::{OfflineStore, StorageHub, TabStorage};
use tradecache_core::widget::{CoordinatorSettings, HeadlessHost, WidgetCoordinator};

pub const ORIGIN: &str = "http://localhost:3000";
pub const T0: i64 = 1_700_000_000_000;

static TRACING: Once = Once::new();

/// Log to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Scripted network with an on/off switch.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, path: &str, status: StatusCode, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url(path).to_string(), Response::new(status, body));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.calls().iter().filter(|call| **call == target).count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.lock().unwrap().push(request.url.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Offline);
        }
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND, "not found")))
    }
}

/// In-memory preferences endpoint. With a gate set, pulls or pushes wait
/// for the gate to be notified before answering.
#[derive(Default)]
pub struct MockPreferences {
    remote: Mutex<Option<RemotePreference>>,
    pushes: Mutex<Vec<RemotePreference>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pull_started: Notify,
    push_gate: Mutex<Option<Arc<Notify>>>,
    push_started: Notify,
}

impl MockPreferences {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_remote(&self, remote: Option<RemotePreference>) {
        *self.remote.lock().unwrap() = remote;
    }

    pub fn pushes(&self) -> Vec<RemotePreference> {
        self.pushes.lock().unwrap().clone()
    }

    /// Hold every following pull until the returned handle is notified.
    pub fn gate_pulls(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub async fn wait_for_pull(&self) {
        self.pull_started.notified().await;
    }

    /// Hold every following push until the returned handle is notified,
    /// once per push.
    pub fn gate_pushes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.push_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub async fn wait_for_push(&self) {
        self.push_started.notified().await;
    }
}

#[async_trait]
impl PreferencesApi for MockPreferences {
    async fn fetch_preferences(&self) -> Result<RemotePreference, ApiError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.pull_started.notify_one();
            gate.notified().await;
        }
        self.remote
            .lock()
            .unwrap()
            .clone()
            .ok_or(ApiError::Unauthorized)
    }

    async fn push_preferences(&self, preferences: &RemotePreference) -> Result<(), ApiError> {
        let gate = self.push_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.push_started.notify_one();
            gate.notified().await;
        }
        self.pushes.lock().unwrap().push(preferences.clone());
        Ok(())
    }
}

pub fn remote(pair: &str, timeframe: &str, last_updated: i64) -> RemotePreference {
    RemotePreference {
        last_selected_pair: pair.to_string(),
        chart_settings: ChartSettings {
            timeframe: timeframe.to_string(),
            trading_view_symbol: format!("BYBIT:{}", pair),
            last_updated,
        },
    }
}

/// One simulated browser tab.
pub struct Tab {
    pub storage: TabStorage,
    pub store: OfflineStore,
    pub host: HeadlessHost,
    pub coordinator: WidgetCoordinator,
}

pub fn open_tab(
    hub: &StorageHub,
    clock: &ManualClock,
    preferences: Arc<MockPreferences>,
) -> Tab {
    let storage = hub.tab();
    let store = OfflineStore::new(Arc::new(storage.clone()), Arc::new(clock.clone()));
    let host = HeadlessHost::with_viewports(&["markets", "trade", "portfolio"]);
    let coordinator = WidgetCoordinator::new(
        store.clone(),
        &storage,
        Arc::new(host.clone()),
        preferences,
        CoordinatorSettings::default(),
    );
    Tab {
        storage,
        store,
        host,
        coordinator,
    }
}
