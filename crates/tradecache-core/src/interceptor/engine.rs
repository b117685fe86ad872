//! The strategy engine behind `Interceptor::intercept`.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{AbortRegistration, Abortable};
use reqwest::{Method, Url};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::cache::CacheStorage;
use super::classify::{classify, Strategy};
use super::error::{FetchError, InterceptError};
use super::fetch::Fetcher;
use super::namespace::{CacheManifest, CacheNamespace};
use super::request::{Request, Response, ResponseKind};
use crate::clock::Clock;
use crate::config::Config;

/// What the interceptor needs to know about the running build.
#[derive(Debug, Clone)]
pub struct InterceptorSettings {
    pub origin: Url,
    pub manifest: CacheManifest,
    /// Paths fetched eagerly on install, relative to `origin`.
    pub precache: Vec<String>,
    /// API paths answered with an offline payload when nothing is cached.
    pub offline_endpoints: Vec<String>,
}

impl InterceptorSettings {
    pub fn from_config(config: &Config) -> Result<Self, InterceptError> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| InterceptError::InvalidUrl(format!("{}: {}", config.origin, e)))?;
        Ok(Self {
            origin,
            manifest: CacheManifest::for_version(&config.build_version),
            precache: config.precache.clone(),
            offline_endpoints: config.offline_endpoints.clone(),
        })
    }
}

/// Serves requests from cache partitions or the network by resource class.
///
/// Clone is cheap; clones share caches and background work.
#[derive(Clone)]
pub struct Interceptor {
    inner: Arc<InterceptorInner>,
}

struct InterceptorInner {
    settings: InterceptorSettings,
    fetcher: Arc<dyn Fetcher>,
    caches: Arc<CacheStorage>,
    clock: Arc<dyn Clock>,
    /// Stale-while-revalidate refreshes still in flight.
    background: Mutex<JoinSet<()>>,
}

impl Interceptor {
    pub fn new(
        settings: InterceptorSettings,
        fetcher: Arc<dyn Fetcher>,
        caches: Arc<CacheStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(InterceptorInner {
                settings,
                fetcher,
                caches,
                clock,
                background: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.inner.caches
    }

    pub fn manifest(&self) -> &CacheManifest {
        &self.inner.settings.manifest
    }

    /// Resolve a path against the app origin.
    pub fn url(&self, path: &str) -> Result<Url, InterceptError> {
        self.inner
            .settings
            .origin
            .join(path)
            .map_err(|e| InterceptError::InvalidUrl(format!("{}: {}", path, e)))
    }

    // ===== Lifecycle =====

    /// Fetch and store the precache list. Nothing is stored unless every
    /// entry succeeds.
    pub async fn install(&self) -> Result<usize, InterceptError> {
        let mut fetched = Vec::with_capacity(self.inner.settings.precache.len());
        for path in &self.inner.settings.precache {
            let url = self.url(path)?;
            let response = self
                .inner
                .fetcher
                .fetch(&Request::get(url.clone()))
                .await
                .map_err(|source| InterceptError::PrecacheFailed {
                    url: url.to_string(),
                    source,
                })?;
            if !response.is_success() {
                return Err(InterceptError::PrecacheFailed {
                    url: url.to_string(),
                    source: FetchError::Status(response.status),
                });
            }
            fetched.push((url, response));
        }

        let count = fetched.len();
        let now = self.now();
        for (url, response) in fetched {
            self.inner
                .caches
                .put(&self.manifest().static_assets, url.as_str(), response, now);
        }
        info!(count = count, version = %self.manifest().static_assets.version, "Precached critical assets");
        Ok(count)
    }

    /// Delete every partition that doesn't belong to this build. Returns the
    /// deleted storage names.
    pub fn activate(&self) -> Vec<String> {
        let keep = self.manifest().storage_names();
        let stale: Vec<String> = self
            .inner
            .caches
            .names()
            .into_iter()
            .filter(|name| !keep.contains(name))
            .collect();
        for name in &stale {
            self.inner.caches.delete(name);
            info!(cache = %name, "Deleted cache partition from previous build");
        }
        stale
    }

    // ===== Interception =====

    pub async fn intercept(&self, request: Request) -> Result<Response, InterceptError> {
        if request.method != Method::GET || !self.is_same_origin(&request.url) {
            return self.passthrough(&request).await;
        }

        let class = classify(&request);
        debug!(url = %request.url, class = ?class, "Intercepting request");
        match class.strategy() {
            Strategy::NetworkFirst => self.network_first(&request).await,
            Strategy::CacheFirst => Ok(self.cache_first(&request).await),
            Strategy::StaleWhileRevalidate => Ok(self.stale_while_revalidate(&request).await),
            Strategy::NetworkFirstWithRootFallback => self.navigation(&request).await,
            Strategy::CacheFirstWithNetworkFallback => self.cache_then_network(&request).await,
        }
    }

    /// `intercept` that gives up with `Aborted` once `registration`'s handle
    /// is aborted, e.g. on page unload.
    pub async fn intercept_abortable(
        &self,
        request: Request,
        registration: AbortRegistration,
    ) -> Result<Response, InterceptError> {
        match Abortable::new(self.intercept(request), registration).await {
            Ok(result) => result,
            Err(_) => Err(InterceptError::Aborted),
        }
    }

    /// Wait for every background revalidation started so far.
    pub async fn settle(&self) {
        let mut pending = std::mem::replace(&mut *self.background(), JoinSet::new());
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!(error = %e, "Background revalidation task failed");
                }
            }
        }
    }

    /// Cancel background revalidations.
    pub fn abort_background(&self) {
        self.background().abort_all();
    }

    async fn passthrough(&self, request: &Request) -> Result<Response, InterceptError> {
        self.inner
            .fetcher
            .fetch(request)
            .await
            .map_err(|source| unavailable(request, source))
    }

    async fn network_first(&self, request: &Request) -> Result<Response, InterceptError> {
        let dynamic = &self.manifest().dynamic;
        match self.inner.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(dynamic, request, &response);
                }
                Ok(response)
            }
            Err(source) => {
                if let Some(cached) = self.cached(dynamic, request) {
                    debug!(url = %request.url, "Network failed, serving cached API response");
                    return Ok(cached);
                }
                if self.is_offline_endpoint(request.url.path()) {
                    debug!(url = %request.url, "Network failed, serving offline payload");
                    return Ok(Response::offline_payload());
                }
                Err(unavailable(request, source))
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> Response {
        let images = &self.manifest().images;
        if let Some(cached) = self.cached(images, request) {
            return cached;
        }
        match self.inner.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(images, request, &response);
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Image unavailable, serving placeholder");
                Response::placeholder_image()
            }
        }
    }

    async fn stale_while_revalidate(&self, request: &Request) -> Response {
        let static_assets = &self.manifest().static_assets;
        if let Some(cached) = self.cached(static_assets, request) {
            self.revalidate_in_background(request.clone());
            return cached;
        }
        match self.inner.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(static_assets, request, &response);
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset unavailable, serving placeholder");
                Response::empty_placeholder()
            }
        }
    }

    async fn navigation(&self, request: &Request) -> Result<Response, InterceptError> {
        let static_assets = &self.manifest().static_assets;
        match self.inner.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(static_assets, request, &response);
                }
                Ok(response)
            }
            Err(source) => {
                if let Some(cached) = self.cached(static_assets, request) {
                    return Ok(cached);
                }
                let root = self.url("/")?;
                if let Some(cached) = self.inner.caches.lookup(static_assets, root.as_str(), self.now()) {
                    debug!(url = %request.url, "Offline navigation, serving cached root");
                    return Ok(cached);
                }
                Err(unavailable(request, source))
            }
        }
    }

    async fn cache_then_network(&self, request: &Request) -> Result<Response, InterceptError> {
        let dynamic = &self.manifest().dynamic;
        if let Some(cached) = self.cached(dynamic, request) {
            return Ok(cached);
        }
        let response = self
            .inner
            .fetcher
            .fetch(request)
            .await
            .map_err(|source| unavailable(request, source))?;
        if response.is_success() && response.kind == ResponseKind::Basic {
            self.store(dynamic, request, &response);
        }
        Ok(response)
    }

    fn revalidate_in_background(&self, request: Request) {
        let this = self.clone();
        let mut background = self.background();
        // Reap finished refreshes so the set doesn't grow without bound
        while background.try_join_next().is_some() {}
        background.spawn(async move {
            match this.inner.fetcher.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    this.store(&this.manifest().static_assets, &request, &response);
                    debug!(url = %request.url, "Revalidated cached asset");
                }
                Ok(response) => {
                    debug!(url = %request.url, status = response.status.as_u16(), "Revalidation kept stale copy");
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Revalidation failed");
                }
            }
        });
    }

    fn cached(&self, namespace: &CacheNamespace, request: &Request) -> Option<Response> {
        self.inner
            .caches
            .lookup(namespace, request.cache_key(), self.now())
    }

    fn store(&self, namespace: &CacheNamespace, request: &Request, response: &Response) {
        self.inner
            .caches
            .put(namespace, request.cache_key(), response.clone(), self.now());
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.inner.settings.origin.origin()
    }

    fn is_offline_endpoint(&self, path: &str) -> bool {
        self.inner
            .settings
            .offline_endpoints
            .iter()
            .any(|endpoint| endpoint == path)
    }

    fn background(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner.background.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_ms()
    }
}

fn unavailable(request: &Request, source: FetchError) -> InterceptError {
    InterceptError::NetworkUnavailable {
        url: request.url.to_string(),
        source,
    }
}
