//! REST client for the backend's chart preferences.
//!
//! This module provides the `PreferencesApi` seam the coordinator reconciles
//! through, and `PreferencesClient`, its `reqwest` implementation. Requests
//! carry an optional bearer token; an unauthenticated client simply gets
//! `ApiError::Unauthorized`, which reconciliation treats as "skip this cycle".

pub mod client;
pub mod error;

pub use client::{PreferencesApi, PreferencesClient};
pub use error::ApiError;
