use crate::errors::RefreshError;
use crate::models::{FundingObservation, InstrumentSnapshot, SummaryRow, WindowRates};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::str::FromStr;

/// Funding payments assumed per day. Venues that settle every 8h are still
/// scaled as if they paid hourly; the annualized figures are an approximation.
pub const PERIODS_PER_DAY: usize = 24;
pub const PERIODS_PER_YEAR: f64 = (PERIODS_PER_DAY * 365) as f64;

/// Trailing window sizes, in observations, after the latest single period.
pub const WINDOWS: [usize; 6] = [
    3,
    PERIODS_PER_DAY,
    3 * PERIODS_PER_DAY,
    7 * PERIODS_PER_DAY,
    14 * PERIODS_PER_DAY,
    30 * PERIODS_PER_DAY,
];

/// What to do with a window longer than the available history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Report the window as missing.
    Omit,
    /// Average whatever observations exist.
    Partial,
}

impl FromStr for WindowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "omit" => Ok(Self::Omit),
            "partial" => Ok(Self::Partial),
            other => Err(format!("unknown window policy {other}, expected omit or partial")),
        }
    }
}

pub fn annualize(rate: f64) -> f64 {
    rate * PERIODS_PER_YEAR
}

/// Mean of the last `k` rates.
///
/// Short series either yield `None` (`Omit`) or the mean of what is there
/// (`Partial`). The error side is always returned so callers can record it.
pub fn trailing_mean(
    instrument: &str,
    rates: &[f64],
    k: usize,
    policy: WindowPolicy,
) -> (Option<f64>, Option<RefreshError>) {
    if rates.is_empty() || k == 0 {
        return (None, None);
    }

    let short = (rates.len() < k).then(|| RefreshError::InsufficientHistory {
        instrument: instrument.to_string(),
        window: k,
        available: rates.len(),
    });

    if short.is_some() && policy == WindowPolicy::Omit {
        return (None, short);
    }

    let tail = &rates[rates.len().saturating_sub(k)..];
    let mean = tail.iter().sum::<f64>() / tail.len() as f64;
    (Some(mean), short)
}

pub struct Aggregator {
    policy: WindowPolicy,
}

impl Aggregator {
    pub fn new(policy: WindowPolicy) -> Self {
        Self { policy }
    }

    /// Builds an unranked row from a chronological series and a live snapshot.
    /// Returns `None` for an empty series; short windows come back as notices.
    pub fn summarize(
        &self,
        instrument: &str,
        series: &[FundingObservation],
        snapshot: &InstrumentSnapshot,
    ) -> (Option<SummaryRow>, Vec<RefreshError>) {
        let rates: Vec<f64> = series.iter().map(|o| o.funding_rate).collect();
        let Some(&latest) = rates.last() else {
            return (None, Vec::new());
        };

        let mut notices = Vec::new();
        let averages: Vec<Option<f64>> = WINDOWS
            .iter()
            .map(|&k| {
                let (mean, notice) = trailing_mean(instrument, &rates, k, self.policy);
                notices.extend(notice);
                mean.map(annualize)
            })
            .collect();

        let annualized = WindowRates {
            latest: annualize(latest),
            periods_3: averages[0],
            day_1: averages[1],
            days_3: averages[2],
            days_7: averages[3],
            days_14: averages[4],
            days_30: averages[5],
        };

        let row = SummaryRow {
            rank: 0,
            instrument: instrument.to_string(),
            volume_24h: snapshot.quote_volume_24h,
            open_interest: snapshot.open_interest_value(),
            next_funding: annualize(snapshot.next_funding_rate),
            annualized,
            observations: rates.len(),
        };

        (Some(row), notices)
    }

    /// Sorts descending by annualized latest rate. Ties keep input order.
    pub fn rank(mut rows: Vec<SummaryRow>) -> Vec<SummaryRow> {
        rows.sort_by_key(|row| Reverse(OrderedFloat(row.annualized.latest)));
        for (i, row) in rows.iter_mut().enumerate() {
            row.rank = i + 1;
        }
        rows
    }
}
