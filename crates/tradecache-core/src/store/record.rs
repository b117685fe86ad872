use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::clock::duration_ms;

const MINUTE_MS: i64 = 60_000;

/// Persisted envelope: `{data, timestamp, expiresAt?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord<T> {
    pub data: T,
    /// Epoch milliseconds of the write.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl<T> StoredRecord<T> {
    pub fn new(data: T, now_ms: i64, ttl: Option<Duration>) -> Self {
        Self {
            data,
            timestamp: now_ms,
            expires_at: ttl.map(|ttl| now_ms.saturating_add(duration_ms(ttl))),
        }
    }

    /// A record is absent once the clock is strictly past `expiresAt`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| now_ms > expires_at)
    }

    pub fn age_minutes(&self, now_ms: i64) -> i64 {
        (now_ms - self.timestamp) / MINUTE_MS
    }

    pub fn age_display(&self, now_ms: i64) -> String {
        let minutes = self.age_minutes(now_ms);
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

impl<T: DeserializeOwned> StoredRecord<T> {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
