use async_trait::async_trait;

use super::error::HostError;
use crate::models::WidgetSession;

/// What the embed is told to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedConfig {
    pub display_symbol: String,
    pub interval: String,
}

impl EmbedConfig {
    pub fn from_session(session: &WidgetSession) -> Self {
        Self {
            display_symbol: session.display_symbol.clone(),
            interval: session.interval.clone(),
        }
    }
}

/// Where the embed's root view currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Viewport(String),
    /// The permanently offscreen holder.
    Parked,
}

#[async_trait]
pub trait WidgetHost: Send + Sync {
    /// Load the vendor's bootstrap script.
    async fn load_bootstrap(&self) -> Result<(), HostError>;

    /// Build an embed in the parking holder, resolving once it reports ready.
    async fn create(&self, config: &EmbedConfig) -> Result<Box<dyn EmbedHandle>, HostError>;
}

/// Exclusive handle on a live embed. At any time its root view has exactly
/// one parent: a viewport or the parking holder.
pub trait EmbedHandle: Send {
    fn placement(&self) -> Placement;

    /// Reparent the root view into `viewport` without rebuilding it.
    fn attach(&mut self, viewport: &str) -> Result<(), HostError>;

    /// Reparent the root view into the parking holder.
    fn park(&mut self) -> Result<(), HostError>;

    /// Update symbol and interval in place.
    fn apply(&mut self, config: &EmbedConfig) -> Result<(), HostError>;

    fn dispose(self: Box<Self>);
}
