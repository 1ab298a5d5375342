pub mod store;

use crate::models::FundingObservation;
use std::collections::{BTreeMap, HashSet};
pub use store::CacheStore;

/// Cached funding history grouped by instrument, each series oldest first.
#[derive(Debug, Clone, Default)]
pub struct FundingCache {
    series: BTreeMap<String, Vec<FundingObservation>>,
}

impl FundingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups flat rows. The first row seen for an (instrument, timestamp) wins.
    pub fn from_rows(rows: Vec<FundingObservation>) -> Self {
        let mut seen = HashSet::new();
        let mut series: BTreeMap<String, Vec<FundingObservation>> = BTreeMap::new();

        for row in rows {
            if seen.insert((row.instrument.clone(), row.timestamp)) {
                series.entry(row.instrument.clone()).or_default().push(row);
            }
        }

        for rows in series.values_mut() {
            rows.sort_by_key(|o| o.timestamp);
        }

        Self { series }
    }

    pub fn series(&self, instrument: &str) -> &[FundingObservation] {
        self.series.get(instrument).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Newest cached payment time for an instrument.
    pub fn last_timestamp(&self, instrument: &str) -> Option<i64> {
        self.series(instrument).iter().map(|o| o.timestamp).max()
    }

    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_sorts_and_dedups() {
        let cache = FundingCache::from_rows(vec![
            FundingObservation::new("ETHUSDT", 2, 0.2),
            FundingObservation::new("BTCUSDT", 3, 0.3),
            FundingObservation::new("BTCUSDT", 1, 0.1),
            FundingObservation::new("BTCUSDT", 3, 0.9),
        ]);

        assert_eq!(cache.len(), 3);
        let btc: Vec<i64> = cache.series("BTCUSDT").iter().map(|o| o.timestamp).collect();
        assert_eq!(btc, vec![1, 3]);
        assert_eq!(cache.series("BTCUSDT")[1].funding_rate, 0.3);
        assert_eq!(cache.series("ETHUSDT").len(), 1);
    }

    #[test]
    fn last_timestamp_per_instrument() {
        let cache = FundingCache::from_rows(vec![
            FundingObservation::new("BTCUSDT", 10, 0.1),
            FundingObservation::new("BTCUSDT", 30, 0.1),
            FundingObservation::new("ETHUSDT", 20, 0.1),
        ]);

        assert_eq!(cache.last_timestamp("BTCUSDT"), Some(30));
        assert_eq!(cache.last_timestamp("ETHUSDT"), Some(20));
        assert_eq!(cache.last_timestamp("SOLUSDT"), None);
        assert!(cache.series("SOLUSDT").is_empty());
    }
}
