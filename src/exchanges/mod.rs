use crate::config::ExchangeKind;
use crate::errors::ExchangeError;
use crate::models::{FundingObservation, Market, OpenInterest, Ticker};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod binance;
pub mod bybit;
#[cfg(test)]
pub mod mock;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Read-only market data capabilities the funding tracker needs.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every market the venue lists, swaps or not.
    async fn list_markets(&self) -> Result<Vec<Market>, ExchangeError>;

    /// Funding history for one instrument, oldest first.
    ///
    /// With `since`, returns every payment at or after that time.
    /// Without it, returns the most recent `limit` payments.
    async fn fetch_funding_history(
        &self,
        instrument: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<FundingObservation>, ExchangeError>;

    async fn fetch_open_interest(&self, instrument: &str) -> Result<OpenInterest, ExchangeError>;

    async fn fetch_ticker(&self, instrument: &str) -> Result<Ticker, ExchangeError>;
}

pub fn build(kind: ExchangeKind) -> Result<Arc<dyn Exchange>, ExchangeError> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

    let exchange: Arc<dyn Exchange> = match kind {
        ExchangeKind::Binance => Arc::new(binance::Binance::new(client)),
        ExchangeKind::Bybit => Arc::new(bybit::Bybit::new(client)),
    };
    Ok(exchange)
}

/// Venues send numbers as JSON strings.
pub(crate) fn parse_number(field: &str, raw: &str) -> Result<f64, ExchangeError> {
    raw.parse::<f64>()
        .map_err(|_| ExchangeError::UnexpectedData(format!("invalid {field}: {raw:?}")))
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Collects the newest `limit` observations by walking pages backwards.
///
/// `fetch_page(end, size)` returns up to `size` rows at or before `end`
/// (the newest rows when `end` is `None`), in any order. Paging stops once
/// `limit` rows are in hand or a short page shows the history is exhausted.
pub(crate) async fn newest_observations<F, Fut>(
    limit: usize,
    page_limit: usize,
    mut fetch_page: F,
) -> Result<Vec<FundingObservation>, ExchangeError>
where
    F: FnMut(Option<i64>, usize) -> Fut,
    Fut: Future<Output = Result<Vec<FundingObservation>, ExchangeError>>,
{
    let mut history = Vec::new();
    let mut end = None;

    while history.len() < limit {
        let size = (limit - history.len()).min(page_limit);
        let page = fetch_page(end, size).await?;
        let full = page.len() >= size;
        let oldest = page.iter().map(|o| o.timestamp).min();
        history.extend(page);

        match oldest {
            Some(ts) if full && end.is_none_or(|e| ts <= e) => end = Some(ts - 1),
            _ => break,
        }
    }

    history.sort_by_key(|o| o.timestamp);
    history.dedup_by_key(|o| o.timestamp);
    if history.len() > limit {
        history.drain(..history.len() - limit);
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A venue holding payments at timestamps 1..=total that serves at most
    /// `page_limit` rows per request, newest first.
    fn venue(
        total: i64,
        page_limit: usize,
        calls: &mut Vec<(Option<i64>, usize)>,
    ) -> impl FnMut(Option<i64>, usize) -> std::future::Ready<Result<Vec<FundingObservation>, ExchangeError>> + '_ {
        move |end, size| {
            calls.push((end, size));
            let newest = end.unwrap_or(total).min(total);
            let page = (1..=newest)
                .rev()
                .take(size.min(page_limit))
                .map(|ts| FundingObservation::new("BTCUSDT", ts, 0.0001))
                .collect();
            std::future::ready(Ok(page))
        }
    }

    #[tokio::test]
    async fn cold_fetch_pages_past_one_page() {
        let mut calls = Vec::new();
        let history = newest_observations(450, 200, venue(1_000, 200, &mut calls))
            .await
            .unwrap();

        let timestamps: Vec<i64> = history.iter().map(|o| o.timestamp).collect();
        assert_eq!(timestamps, (551..=1_000).collect::<Vec<_>>());
        assert_eq!(calls, vec![(None, 200), (Some(800), 200), (Some(600), 50)]);
    }

    #[tokio::test]
    async fn cold_fetch_stops_when_history_runs_out() {
        let mut calls = Vec::new();
        let history = newest_observations(720, 200, venue(150, 200, &mut calls))
            .await
            .unwrap();

        assert_eq!(history.len(), 150);
        assert_eq!(history[0].timestamp, 1);
        assert_eq!(calls.len(), 1);
    }

    #[tokio::test]
    async fn cold_fetch_within_one_page_is_one_request() {
        let mut calls = Vec::new();
        let history = newest_observations(5, 1_000, venue(20, 1_000, &mut calls))
            .await
            .unwrap();

        assert_eq!(history.first().map(|o| o.timestamp), Some(16));
        assert_eq!(calls, vec![(None, 5)]);
    }
}
