use serde::{Deserialize, Serialize};

/// Server-held mirror of the chart session, as served by `GET /preferences`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct RemotePreference {
    pub last_selected_pair: String,
    pub chart_settings: ChartSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ChartSettings {
    pub timeframe: String,
    pub trading_view_symbol: String,
    /// Epoch milliseconds; a server that never saw a change sends nothing.
    #[serde(default)]
    pub last_updated: i64,
}
