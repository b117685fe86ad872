/// Lifecycle of the embed within one tab.
///
/// `Uninitialized → Initializing → {Visible ⇄ Hidden} → Destroyed`, with
/// `Failed` reachable from `Initializing` and left again by the next
/// explicit acquire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WidgetPhase {
    #[default]
    Uninitialized,
    Initializing,
    /// Ready and attached to a viewport.
    Visible,
    /// Ready and parked offscreen.
    Hidden,
    Failed(String),
    Destroyed,
}

impl WidgetPhase {
    pub fn is_ready(&self) -> bool {
        matches!(self, WidgetPhase::Visible | WidgetPhase::Hidden)
    }
}
