//! One tab's worth of services, wired together.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::{PreferencesApi, PreferencesClient};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::interceptor::{CacheStorage, Fetcher, HttpFetcher, Interceptor, InterceptorSettings};
use crate::store::{FileBackend, OfflineStore, StorageBackend, StorageHub, TabStorage};
use crate::widget::{CoordinatorSettings, WidgetCoordinator, WidgetHost, SESSION_KEY};

const RESPONSES_DIR: &str = "responses";

/// Collaborators the services are built over.
pub struct ServiceDeps {
    /// This tab's view of the shared durable storage.
    pub storage: TabStorage,
    /// Response partitions, shared by every tab over the same directory.
    pub caches: Arc<CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub host: Arc<dyn WidgetHost>,
    pub preferences: Arc<dyn PreferencesApi>,
    pub clock: Arc<dyn Clock>,
    /// Deprecated storage whose session is moved into `storage` on init.
    pub legacy: Option<Arc<dyn StorageBackend>>,
}

impl ServiceDeps {
    /// Real network and system clock. `token` authenticates preference sync.
    pub fn http(
        config: &Config,
        storage: TabStorage,
        host: Arc<dyn WidgetHost>,
        token: Option<String>,
    ) -> Result<Self> {
        let settings = InterceptorSettings::from_config(config)?;
        let caches = Services::open_caches(config)?;
        let fetcher = HttpFetcher::new(settings.origin).context("Failed to build HTTP client")?;
        let mut preferences = PreferencesClient::new(config.api_base_url.as_str())
            .context("Failed to build preferences client")?;
        if let Some(token) = token {
            preferences.set_token(token);
        }

        Ok(Self {
            storage,
            caches: Arc::new(caches),
            fetcher: Arc::new(fetcher),
            host,
            preferences: Arc::new(preferences),
            clock: Arc::new(SystemClock),
            legacy: None,
        })
    }
}

/// The interceptor, store and chart coordinator of one tab.
pub struct Services {
    pub store: OfflineStore,
    pub interceptor: Interceptor,
    pub coordinator: WidgetCoordinator,
}

impl Services {
    /// Durable storage under `config.cache_dir()`, shared by every tab
    /// opened from the returned hub.
    pub fn open_storage(config: &Config) -> Result<StorageHub> {
        let dir = config.cache_dir()?;
        let backend = FileBackend::new(dir.clone())
            .with_context(|| format!("Failed to open storage at {}", dir.display()))?;
        Ok(StorageHub::new(Arc::new(backend)))
    }

    /// Response partitions under `config.cache_dir()/responses`.
    pub fn open_caches(config: &Config) -> Result<CacheStorage> {
        let dir = config.cache_dir()?.join(RESPONSES_DIR);
        CacheStorage::open(dir.clone())
            .with_context(|| format!("Failed to open response cache at {}", dir.display()))
    }

    /// Build every service and start the coordinator's background work.
    /// Must be called inside a tokio runtime.
    pub async fn init(config: &Config, deps: ServiceDeps) -> Result<Self> {
        let store = OfflineStore::new(Arc::new(deps.storage.clone()), Arc::clone(&deps.clock));
        if let Some(ref legacy) = deps.legacy {
            store.migrate_from(legacy.as_ref(), &[SESSION_KEY]);
        }
        store.purge_expired();

        let settings =
            InterceptorSettings::from_config(config).context("Invalid interceptor settings")?;
        let interceptor = Interceptor::new(settings, deps.fetcher, deps.caches, deps.clock);
        // Without a precache the app still works online
        if let Err(e) = interceptor.install().await {
            warn!(error = %e, "Precache failed, continuing without offline shell");
        }
        interceptor.activate();

        let coordinator = WidgetCoordinator::new(
            store.clone(),
            &deps.storage,
            deps.host,
            deps.preferences,
            CoordinatorSettings::from_config(config),
        );
        coordinator.start();

        info!(version = %config.build_version, tab = deps.storage.id(), "Services initialized");
        Ok(Self {
            store,
            interceptor,
            coordinator,
        })
    }

    /// Stop background work. The embed stays alive until `coordinator.clear()`.
    pub fn teardown(&self) {
        self.coordinator.shutdown();
        self.interceptor.abort_background();
        info!("Services stopped");
    }
}
