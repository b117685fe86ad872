//! Offline resilience layer for the trading web client.
//!
//! Three cooperating services keep the client usable on a flaky mobile
//! connection:
//!
//! - [`Interceptor`]: serves requests from versioned cache partitions with a
//!   per-resource-class strategy (network-first, cache-first,
//!   stale-while-revalidate).
//! - [`OfflineStore`]: typed, TTL-aware records over the host's durable
//!   key-value storage.
//! - [`WidgetCoordinator`]: owns the single live chart embed, persists its
//!   session, mirrors it across tabs and reconciles it with the server.
//!
//! [`Services`] wires one instance of each per tab.

pub mod api;
pub mod clock;
pub mod config;
pub mod interceptor;
pub mod models;
pub mod services;
pub mod store;
pub mod widget;

pub use api::{ApiError, PreferencesApi, PreferencesClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use interceptor::{Interceptor, InterceptError, Request, Response};
pub use models::{ChartSettings, RemotePreference, WidgetSession};
pub use services::{ServiceDeps, Services};
pub use store::{OfflineStore, StorageBackend, StorageHub, StoredRecord, TabStorage};
pub use widget::{WidgetCoordinator, WidgetError, WidgetHost, WidgetPhase};
