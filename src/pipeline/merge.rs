use crate::models::FundingObservation;
use std::collections::HashSet;

/// Result of reconciling fetched history with the cache for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    /// Cached plus new rows, oldest first.
    pub series: Vec<FundingObservation>,
    /// New rows only; this is what gets appended to the cache file.
    pub appended: Vec<FundingObservation>,
}

/// Pure merge of cached and freshly fetched history.
///
/// Fetched rows are kept only if they belong to `instrument` and are strictly
/// newer than the newest cached row. The union is unique per
/// (instrument, timestamp), first occurrence winning, and sorted by time.
pub fn merge(
    instrument: &str,
    cached: &[FundingObservation],
    fetched: Vec<FundingObservation>,
) -> Merged {
    let cutoff = cached
        .iter()
        .filter(|o| o.instrument == instrument)
        .map(|o| o.timestamp)
        .max();

    let mut seen: HashSet<i64> = HashSet::new();
    let mut series: Vec<FundingObservation> = cached
        .iter()
        .filter(|o| o.instrument == instrument)
        .filter(|o| seen.insert(o.timestamp))
        .cloned()
        .collect();

    let mut appended: Vec<FundingObservation> = fetched
        .into_iter()
        .filter(|o| o.instrument == instrument)
        .filter(|o| cutoff.is_none_or(|cutoff| o.timestamp > cutoff))
        .filter(|o| seen.insert(o.timestamp))
        .collect();
    appended.sort_by_key(|o| o.timestamp);

    series.extend(appended.iter().cloned());
    series.sort_by_key(|o| o.timestamp);

    Merged { series, appended }
}
