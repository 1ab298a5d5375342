use super::Exchange;
use crate::errors::ExchangeError;
use crate::models::{FundingObservation, Market, MarketKind, OpenInterest, Ticker};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// In-memory venue for pipeline tests.
#[derive(Default)]
pub struct MockExchange {
    pub markets: Vec<Market>,
    pub history: HashMap<String, Vec<FundingObservation>>,
    pub tickers: HashMap<String, Ticker>,
    pub open_interest: HashMap<String, f64>,
    pub unreachable: bool,
    pub failing_history: HashSet<String>,
    /// (instrument, since, limit) for every history call.
    pub history_calls: Mutex<Vec<(String, Option<i64>, Option<usize>)>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tradable perpetual with hourly history and a live snapshot.
    pub fn with_perp(mut self, instrument: &str, rates: &[f64]) -> Self {
        self.markets.push(Market {
            id: instrument.to_string(),
            kind: MarketKind::PerpetualSwap,
        });
        self.history.insert(
            instrument.to_string(),
            rates
                .iter()
                .enumerate()
                .map(|(i, &r)| FundingObservation::new(instrument, (i as i64 + 1) * 3_600_000, r))
                .collect(),
        );
        self.tickers.insert(
            instrument.to_string(),
            Ticker {
                last_price: 10.0,
                quote_volume_24h: 1_000.0,
                next_funding_rate: 0.0001,
            },
        );
        self.open_interest.insert(instrument.to_string(), 5.0);
        self
    }

    pub fn with_market(mut self, id: &str, kind: MarketKind) -> Self {
        self.markets.push(Market {
            id: id.to_string(),
            kind,
        });
        self
    }

    pub fn history_calls(&self) -> Vec<(String, Option<i64>, Option<usize>)> {
        self.history_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list_markets(&self) -> Result<Vec<Market>, ExchangeError> {
        if self.unreachable {
            return Err(ExchangeError::UnexpectedData("connection refused".to_string()));
        }
        Ok(self.markets.clone())
    }

    async fn fetch_funding_history(
        &self,
        instrument: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<FundingObservation>, ExchangeError> {
        self.history_calls
            .lock()
            .unwrap()
            .push((instrument.to_string(), since, limit));

        if self.failing_history.contains(instrument) {
            return Err(ExchangeError::Api {
                code: 500,
                message: "upstream timeout".to_string(),
            });
        }

        let all = self.history.get(instrument).cloned().unwrap_or_default();
        Ok(match since {
            // inclusive, like real venues: the boundary row comes back again
            Some(since) => all.into_iter().filter(|o| o.timestamp >= since).collect(),
            None => {
                let limit = limit.unwrap_or(all.len());
                all[all.len().saturating_sub(limit)..].to_vec()
            }
        })
    }

    async fn fetch_open_interest(&self, instrument: &str) -> Result<OpenInterest, ExchangeError> {
        self.open_interest
            .get(instrument)
            .map(|&amount| OpenInterest { amount })
            .ok_or_else(|| ExchangeError::UnexpectedData(format!("no open interest for {instrument}")))
    }

    async fn fetch_ticker(&self, instrument: &str) -> Result<Ticker, ExchangeError> {
        self.tickers
            .get(instrument)
            .cloned()
            .ok_or_else(|| ExchangeError::UnexpectedData(format!("no ticker for {instrument}")))
    }
}
