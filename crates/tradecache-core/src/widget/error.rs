use thiserror::Error;

/// Failures reported by the platform host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Failed to load embed script: {0}")]
    ScriptLoad(String),

    #[error("Embed failed to start: {0}")]
    Startup(String),

    #[error("No viewport named {0}")]
    ViewportMissing(String),

    #[error("Embed already disposed")]
    Disposed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WidgetError {
    /// The embed could not be built. The caller may offer a retry; the
    /// coordinator won't retry on its own.
    #[error("Chart failed to initialize: {0}")]
    InitFailed(String),

    #[error("Chart session was cleared")]
    Destroyed,

    #[error(transparent)]
    Host(#[from] HostError),
}
