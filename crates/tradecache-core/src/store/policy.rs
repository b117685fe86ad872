use std::collections::HashMap;
use std::time::Duration;

/// News articles stay readable for a day.
const NEWS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Market lists and price feeds go stale quickly.
const PRICE_FEED_TTL: Duration = Duration::from_secs(10 * 60);

/// A single-symbol live quote is only worth showing for seconds.
const LIVE_QUOTE_TTL: Duration = Duration::from_secs(30);

/// Everything else: a week.
const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default time-to-live per kind of key, with per-key overrides.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub news: Duration,
    pub price_feed: Duration,
    pub live_quote: Duration,
    pub default: Duration,
    overrides: HashMap<String, Duration>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            news: NEWS_TTL,
            price_feed: PRICE_FEED_TTL,
            live_quote: LIVE_QUOTE_TTL,
            default: DEFAULT_TTL,
            overrides: HashMap::new(),
        }
    }
}

impl TtlPolicy {
    pub fn with_override(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.overrides.insert(key.into(), ttl);
        self
    }

    /// Exact override first, then by key prefix, then the default.
    pub fn ttl_for(&self, key: &str) -> Duration {
        if let Some(ttl) = self.overrides.get(key) {
            return *ttl;
        }
        if key.starts_with("quote:") {
            self.live_quote
        } else if key.starts_with("news") {
            self.news
        } else if key.starts_with("prices") || key.starts_with("market") {
            self.price_feed
        } else {
            self.default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_classification() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for("news"), NEWS_TTL);
        assert_eq!(policy.ttl_for("news:featured"), NEWS_TTL);
        assert_eq!(policy.ttl_for("prices"), PRICE_FEED_TTL);
        assert_eq!(policy.ttl_for("market:spot"), PRICE_FEED_TTL);
        assert_eq!(policy.ttl_for("quote:BTCUSDT"), LIVE_QUOTE_TTL);
        assert_eq!(policy.ttl_for("kyc-status"), DEFAULT_TTL);
    }

    #[test]
    fn test_override_wins() {
        let policy = TtlPolicy::default().with_override("news", Duration::from_secs(60));
        assert_eq!(policy.ttl_for("news"), Duration::from_secs(60));
        assert_eq!(policy.ttl_for("news:featured"), NEWS_TTL);
    }
}
