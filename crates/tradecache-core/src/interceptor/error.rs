use reqwest::StatusCode;
use thiserror::Error;

/// A fetch that produced no usable response.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Device is offline")]
    Offline,

    #[error("Unexpected status {0}")]
    Status(StatusCode),
}

#[derive(Error, Debug)]
pub enum InterceptError {
    /// The network failed and nothing cached can stand in for this request.
    #[error("Network unavailable for {url}: {source}")]
    NetworkUnavailable {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Precache of {url} failed: {source}")]
    PrecacheFailed {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request aborted")]
    Aborted,
}

impl InterceptError {
    pub fn is_network_unavailable(&self) -> bool {
        matches!(self, InterceptError::NetworkUnavailable { .. })
    }
}
