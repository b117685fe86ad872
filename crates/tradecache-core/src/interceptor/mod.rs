//! Network-boundary cache strategies.
//!
//! The `Interceptor` sees every same-origin GET the client issues and serves
//! it according to the resource's class:
//!
//! - API calls: network-first, falling back to the last cached response and
//!   then to a synthesized offline payload for a few critical reads
//! - images: cache-first, with a placeholder when nothing can be had
//! - scripts and styles: stale-while-revalidate
//! - navigations: network-first, falling back to the cached page or the root
//! - everything else: cache-first with network fallback
//!
//! Responses live in named partitions tagged with the build version. On
//! activation every partition from another build is dropped whole.

pub mod cache;
pub mod classify;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod namespace;
pub mod request;

pub use cache::CacheStorage;
pub use classify::{classify, ResourceClass, Strategy};
pub use engine::{Interceptor, InterceptorSettings};
pub use error::{FetchError, InterceptError};
pub use fetch::{Fetcher, HttpFetcher};
pub use namespace::{CacheManifest, CacheNamespace};
pub use request::{Destination, Request, Response, ResponseKind, FALLBACK_HEADER};
