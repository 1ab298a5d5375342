use serde::Serialize;
use std::collections::BTreeMap;

/// One funding payment for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundingObservation {
    pub instrument: String,
    /// Payment time, epoch milliseconds.
    pub timestamp: i64,
    pub funding_rate: f64,
    /// Venue-specific fields, carried through to the cache file untouched.
    pub extra: BTreeMap<String, String>,
}

impl FundingObservation {
    pub fn new(instrument: impl Into<String>, timestamp: i64, funding_rate: f64) -> Self {
        Self {
            instrument: instrument.into(),
            timestamp,
            funding_rate,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketKind {
    PerpetualSwap,
    Other,
}

#[derive(Debug, Clone)]
pub struct Market {
    pub id: String,
    pub kind: MarketKind,
}

#[derive(Debug, Clone)]
pub struct OpenInterest {
    /// Outstanding contracts in base units.
    pub amount: f64,
}

#[derive(Debug, Clone)]
pub struct Ticker {
    pub last_price: f64,
    pub quote_volume_24h: f64,
    pub next_funding_rate: f64,
}

/// Live market state for one instrument, rebuilt every cycle.
#[derive(Debug, Clone)]
pub struct InstrumentSnapshot {
    pub last_price: f64,
    pub quote_volume_24h: f64,
    pub open_interest_amount: f64,
    pub next_funding_rate: f64,
}

impl InstrumentSnapshot {
    pub fn from_parts(ticker: Ticker, open_interest: OpenInterest) -> Self {
        Self {
            last_price: ticker.last_price,
            quote_volume_24h: ticker.quote_volume_24h,
            open_interest_amount: open_interest.amount,
            next_funding_rate: ticker.next_funding_rate,
        }
    }

    /// Open interest valued in the quote currency.
    pub fn open_interest_value(&self) -> f64 {
        self.open_interest_amount * self.last_price
    }
}

/// Annualized average funding per trailing window.
/// `None` means the window was skipped for lack of history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowRates {
    pub latest: f64,
    pub periods_3: Option<f64>,
    pub day_1: Option<f64>,
    pub days_3: Option<f64>,
    pub days_7: Option<f64>,
    pub days_14: Option<f64>,
    pub days_30: Option<f64>,
}

/// One ranked line of the funding table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub rank: usize,
    pub instrument: String,
    pub volume_24h: f64,
    pub open_interest: f64,
    /// Annualized.
    pub next_funding: f64,
    pub annualized: WindowRates,
    pub observations: usize,
}
