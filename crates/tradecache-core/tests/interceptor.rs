mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::AbortHandle;
use reqwest::{Method, StatusCode};

use common::{init_tracing, url, MockFetcher};
use tradecache_core::clock::ManualClock;
use tradecache_core::interceptor::{
    CacheManifest, CacheStorage, Destination, InterceptError, Interceptor, InterceptorSettings,
    Request, Response, FALLBACK_HEADER,
};
use tradecache_core::Config;

fn build(version: &str, fetcher: Arc<MockFetcher>, caches: Arc<CacheStorage>) -> (Interceptor, ManualClock) {
    init_tracing();
    let config = Config {
        build_version: version.to_string(),
        ..Config::default()
    };
    let clock = ManualClock::new(common::T0);
    let settings = InterceptorSettings::from_config(&config).unwrap();
    let interceptor = Interceptor::new(settings, fetcher, caches, Arc::new(clock.clone()));
    (interceptor, clock)
}

fn route_precache(fetcher: &MockFetcher) {
    for path in Config::default().precache {
        fetcher.route(&path, StatusCode::OK, "shell");
    }
}

#[tokio::test]
async fn test_api_prefers_network_then_falls_back_to_cache() {
    let fetcher = MockFetcher::new();
    fetcher.route("/api/markets", StatusCode::OK, r#"{"pairs":["BTCUSDT"]}"#);
    let (interceptor, _) = build("v1", fetcher.clone(), Arc::new(CacheStorage::new()));

    let online = interceptor.intercept(Request::get(url("/api/markets"))).await.unwrap();
    assert_eq!(online.text(), r#"{"pairs":["BTCUSDT"]}"#);

    fetcher.set_offline(true);
    let offline = interceptor.intercept(Request::get(url("/api/markets"))).await.unwrap();
    assert_eq!(offline.text(), online.text());
    assert!(!offline.is_fallback());
    assert_eq!(fetcher.calls_to("/api/markets"), 2);
}

#[tokio::test]
async fn test_offline_payload_only_for_listed_endpoints() {
    let fetcher = MockFetcher::new();
    fetcher.set_offline(true);
    let (interceptor, _) = build("v1", fetcher, Arc::new(CacheStorage::new()));

    let balance = interceptor
        .intercept(Request::get(url("/api/user/balance")))
        .await
        .unwrap();
    assert_eq!(balance.status, StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_slice(&balance.body).unwrap();
    assert_eq!(body["offline"], true);
    assert_eq!(body["success"], false);
    assert_eq!(balance.headers[FALLBACK_HEADER], "offline");

    let err = interceptor
        .intercept(Request::get(url("/api/orders")))
        .await
        .unwrap_err();
    assert!(err.is_network_unavailable());
}

#[tokio::test]
async fn test_cached_image_skips_network() {
    let fetcher = MockFetcher::new();
    fetcher.route("/img/btc.png", StatusCode::OK, "png-bytes");
    let (interceptor, _) = build("v1", fetcher.clone(), Arc::new(CacheStorage::new()));

    interceptor.intercept(Request::get(url("/img/btc.png"))).await.unwrap();
    let again = interceptor.intercept(Request::get(url("/img/btc.png"))).await.unwrap();
    assert_eq!(again.text(), "png-bytes");
    assert_eq!(fetcher.calls_to("/img/btc.png"), 1);
}

#[tokio::test]
async fn test_missing_image_gets_placeholder() {
    let fetcher = MockFetcher::new();
    fetcher.set_offline(true);
    let (interceptor, _) = build("v1", fetcher, Arc::new(CacheStorage::new()));

    let response = interceptor
        .intercept(Request::get(url("/avatars/42")).with_destination(Destination::Image))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.is_fallback());
    assert!(response.text().starts_with("<svg"));
}

#[tokio::test]
async fn test_expired_image_is_refetched() {
    let fetcher = MockFetcher::new();
    fetcher.route("/img/eth.png", StatusCode::OK, "v1");
    let (interceptor, clock) = build("v1", fetcher.clone(), Arc::new(CacheStorage::new()));

    interceptor.intercept(Request::get(url("/img/eth.png"))).await.unwrap();
    clock.advance(Duration::from_secs(31 * 24 * 60 * 60));
    fetcher.route("/img/eth.png", StatusCode::OK, "v2");

    let response = interceptor.intercept(Request::get(url("/img/eth.png"))).await.unwrap();
    assert_eq!(response.text(), "v2");
}

#[tokio::test]
async fn test_stale_while_revalidate_refreshes_in_background() {
    let fetcher = MockFetcher::new();
    fetcher.route("/_next/app.js", StatusCode::OK, "old");
    let (interceptor, _) = build("v1", fetcher.clone(), Arc::new(CacheStorage::new()));

    let first = interceptor.intercept(Request::get(url("/_next/app.js"))).await.unwrap();
    assert_eq!(first.text(), "old");

    fetcher.route("/_next/app.js", StatusCode::OK, "new");
    let stale = interceptor.intercept(Request::get(url("/_next/app.js"))).await.unwrap();
    assert_eq!(stale.text(), "old");

    interceptor.settle().await;
    let fresh = interceptor.intercept(Request::get(url("/_next/app.js"))).await.unwrap();
    assert_eq!(fresh.text(), "new");
}

#[tokio::test]
async fn test_offline_navigation_serves_cached_root() {
    let fetcher = MockFetcher::new();
    route_precache(&fetcher);
    let (interceptor, _) = build("v1", fetcher.clone(), Arc::new(CacheStorage::new()));
    assert_eq!(interceptor.install().await.unwrap(), 4);

    fetcher.set_offline(true);
    let page = interceptor
        .intercept(Request::navigate(url("/markets/BTCUSDT")))
        .await
        .unwrap();
    assert_eq!(page.text(), "shell");
}

#[tokio::test]
async fn test_failed_install_is_atomic() {
    let fetcher = MockFetcher::new();
    route_precache(&fetcher);
    fetcher.route("/manifest.json", StatusCode::INTERNAL_SERVER_ERROR, "boom");
    let caches = Arc::new(CacheStorage::new());
    let (interceptor, _) = build("v1", fetcher, caches.clone());

    let err = interceptor.install().await.unwrap_err();
    assert!(matches!(err, InterceptError::PrecacheFailed { .. }));
    assert!(caches.names().is_empty());
}

#[tokio::test]
async fn test_activation_evicts_previous_build() {
    let fetcher = MockFetcher::new();
    route_precache(&fetcher);
    fetcher.route("/api/markets", StatusCode::OK, "[]");
    let caches = Arc::new(CacheStorage::new());

    let (old, _) = build("v1", fetcher.clone(), caches.clone());
    old.install().await.unwrap();
    old.intercept(Request::get(url("/api/markets"))).await.unwrap();

    let (new, _) = build("v2", fetcher.clone(), caches.clone());
    new.install().await.unwrap();
    let mut deleted = new.activate();
    deleted.sort();
    assert_eq!(deleted, vec!["dynamic-v1".to_string(), "static-v1".to_string()]);
    assert_eq!(caches.names(), vec!["static-v2".to_string()]);
    assert_eq!(
        CacheManifest::for_version("v2").storage_names().len(),
        3
    );
}

#[tokio::test]
async fn test_dynamic_cache_is_trimmed() {
    let fetcher = MockFetcher::new();
    let (interceptor, _) = build("v1", fetcher.clone(), Arc::new(CacheStorage::new()));
    for i in 0..60 {
        fetcher.route(&format!("/api/ticker/{}", i), StatusCode::OK, "{}");
        interceptor
            .intercept(Request::get(url(&format!("/api/ticker/{}", i))))
            .await
            .unwrap();
    }
    let dynamic = &interceptor.manifest().dynamic;
    assert_eq!(interceptor.caches().len(dynamic), 50);
    assert!(!interceptor.caches().contains(dynamic, url("/api/ticker/0").as_str()));
    assert!(interceptor.caches().contains(dynamic, url("/api/ticker/59").as_str()));
}

#[tokio::test]
async fn test_non_get_and_cross_origin_pass_through() {
    let fetcher = MockFetcher::new();
    fetcher.route("/api/orders", StatusCode::CREATED, "{}");
    let (interceptor, _) = build("v1", fetcher.clone(), Arc::new(CacheStorage::new()));

    let post = Request::get(url("/api/orders")).with_method(Method::POST);
    assert_eq!(interceptor.intercept(post).await.unwrap().status, StatusCode::CREATED);
    assert!(interceptor.caches().names().is_empty());

    let foreign = Request::get(reqwest::Url::parse("https://cdn.example.com/lib.js").unwrap());
    let response = interceptor.intercept(foreign).await.unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(interceptor.caches().names().is_empty());
}

#[tokio::test]
async fn test_aborted_request() {
    let fetcher = MockFetcher::new();
    let (interceptor, _) = build("v1", fetcher, Arc::new(CacheStorage::new()));

    let (handle, registration) = AbortHandle::new_pair();
    handle.abort();
    let result = interceptor
        .intercept_abortable(Request::get(url("/api/markets")), registration)
        .await;
    assert!(matches!(result, Err(InterceptError::Aborted)));
}

#[test]
fn test_response_helpers() {
    let response = Response::new(StatusCode::OK, "hi");
    assert!(response.is_success());
    assert!(!response.is_fallback());
}
