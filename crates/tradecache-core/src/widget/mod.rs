//! Persistence of the single live chart embed.
//!
//! The chart vendor's embed is expensive to construct, so one instance per
//! tab is built on first use and then handed from page to page:
//!
//! - `WidgetHost`/`EmbedHandle`: the platform's view of the embed, an opaque
//!   handle that can be attached to a viewport, parked offscreen, updated in
//!   place and disposed. Moving a live view between containers is a platform
//!   capability; hosts that can't reparent a view can't implement this trait.
//! - `HeadlessHost`: an in-memory container tree implementing the host
//! - `WidgetCoordinator`: the lifecycle, persistence, cross-tab and server
//!   reconciliation logic

pub mod coordinator;
pub mod error;
pub mod headless;
pub mod host;
pub mod phase;

pub use coordinator::{
    CoordinatorSettings, Subscription, SyncOutcome, WidgetCoordinator, SESSION_KEY,
};
pub use error::{HostError, WidgetError};
pub use headless::{EmbedId, HeadlessHost};
pub use host::{EmbedConfig, EmbedHandle, Placement, WidgetHost};
pub use phase::WidgetPhase;
