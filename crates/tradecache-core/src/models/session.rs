use serde::{Deserialize, Serialize};

use super::{ChartSettings, RemotePreference};

/// Pair shown before the user has picked anything.
pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_DISPLAY_SYMBOL: &str = "BYBIT:BTCUSDT";
pub const DEFAULT_INTERVAL: &str = "15";

/// The single logical state of the chart embed, shared by every tab of a
/// browser profile through durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct WidgetSession {
    pub symbol: String,
    /// Vendor-qualified symbol handed to the embed, e.g. `BYBIT:SOLUSDT`.
    pub display_symbol: String,
    pub interval: String,
    /// Epoch milliseconds of the last symbol or interval change.
    pub last_updated: i64,
    pub is_mounted: bool,
    pub is_visible: bool,
}

impl Default for WidgetSession {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            display_symbol: DEFAULT_DISPLAY_SYMBOL.to_string(),
            interval: DEFAULT_INTERVAL.to_string(),
            last_updated: 0,
            is_mounted: false,
            is_visible: false,
        }
    }
}

impl WidgetSession {
    /// True when the server-synchronized fields match.
    pub fn same_durable_state(&self, other: &WidgetSession) -> bool {
        self.symbol == other.symbol
            && self.display_symbol == other.display_symbol
            && self.interval == other.interval
            && self.last_updated == other.last_updated
    }

    /// Copy the server-synchronized fields from `other`, keeping this tab's
    /// mount and visibility flags.
    pub fn adopt_durable(&mut self, other: &WidgetSession) {
        self.symbol = other.symbol.clone();
        self.display_symbol = other.display_symbol.clone();
        self.interval = other.interval.clone();
        self.last_updated = other.last_updated;
    }

    /// Overwrite the durable fields with the server's copy.
    pub fn adopt_remote(&mut self, remote: &RemotePreference) {
        self.symbol = remote.last_selected_pair.clone();
        self.display_symbol = remote.chart_settings.trading_view_symbol.clone();
        self.interval = remote.chart_settings.timeframe.clone();
        self.last_updated = remote.chart_settings.last_updated;
    }

    pub fn to_remote(&self) -> RemotePreference {
        RemotePreference {
            last_selected_pair: self.symbol.clone(),
            chart_settings: ChartSettings {
                timeframe: self.interval.clone(),
                trading_view_symbol: self.display_symbol.clone(),
                last_updated: self.last_updated,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(WidgetSession::default()).unwrap();
        assert_eq!(json["displaySymbol"], "BYBIT:BTCUSDT");
        assert_eq!(json["lastUpdated"], 0);
        assert_eq!(json["isMounted"], false);
    }

    #[test]
    fn test_adopt_durable_keeps_tab_flags() {
        let mut local = WidgetSession {
            is_mounted: true,
            is_visible: true,
            ..WidgetSession::default()
        };
        let incoming = WidgetSession {
            symbol: "SOLUSDT".to_string(),
            display_symbol: "BYBIT:SOLUSDT".to_string(),
            last_updated: 42,
            ..WidgetSession::default()
        };

        local.adopt_durable(&incoming);
        assert_eq!(local.symbol, "SOLUSDT");
        assert_eq!(local.last_updated, 42);
        assert!(local.is_mounted);
        assert!(local.is_visible);
        assert!(local.same_durable_state(&incoming));
    }

    #[test]
    fn test_remote_round_trip_preserves_durable_fields() {
        let session = WidgetSession {
            symbol: "ETHUSDT".to_string(),
            display_symbol: "BYBIT:ETHUSDT".to_string(),
            interval: "60".to_string(),
            last_updated: 1_700_000_000_000,
            is_mounted: true,
            is_visible: false,
        };
        let mut restored = WidgetSession::default();
        restored.adopt_remote(&session.to_remote());
        assert!(restored.same_durable_state(&session));
        assert!(!restored.is_mounted);
    }
}
