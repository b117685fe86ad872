//! Data models shared between the coordinator, the store and the server.
//!
//! - `WidgetSession`: logical state of the persistent chart embed
//! - `RemotePreference`, `ChartSettings`: the server-held mirror of it

pub mod preferences;
pub mod session;

pub use preferences::{ChartSettings, RemotePreference};
pub use session::WidgetSession;
