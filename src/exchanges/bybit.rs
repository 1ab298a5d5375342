use super::{Exchange, newest_observations, now_ms, parse_number};
use crate::errors::ExchangeError;
use crate::models::{FundingObservation, Market, MarketKind, OpenInterest, Ticker};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

const BASE_URL: &str = "https://api.bybit.com";
const FUNDING_PAGE_LIMIT: usize = 200;
const INSTRUMENTS_PAGE_LIMIT: usize = 1000;

/// Every v5 response is wrapped like this; errors come back with HTTP 200.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "retCode")]
    ret_code: i64,

    #[serde(rename = "retMsg", default)]
    ret_msg: String,

    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    list: Vec<T>,

    #[serde(rename = "nextPageCursor", default)]
    next_page_cursor: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentInfo {
    symbol: String,

    #[serde(rename = "contractType", default)]
    contract_type: String,

    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct FundingEntry {
    symbol: String,

    #[serde(rename = "fundingRate")]
    funding_rate: String,

    #[serde(rename = "fundingRateTimestamp")]
    funding_rate_timestamp: String,
}

#[derive(Debug, Deserialize)]
struct OpenInterestEntry {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct BybitTicker {
    #[serde(rename = "lastPrice")]
    last_price: String,

    #[serde(rename = "turnover24h")]
    turnover_24h: String,

    #[serde(rename = "fundingRate", default)]
    funding_rate: String,
}

impl Envelope {
    fn into_result<T: DeserializeOwned>(self) -> Result<T, ExchangeError> {
        // Bybit signals errors via retCode, not just HTTP status
        if self.ret_code != 0 {
            return Err(ExchangeError::Api {
                code: self.ret_code,
                message: self.ret_msg,
            });
        }
        Ok(serde_json::from_value(self.result)?)
    }
}

impl InstrumentInfo {
    fn into_market(self) -> Market {
        let kind = if self.contract_type == "LinearPerpetual" && self.status == "Trading" {
            MarketKind::PerpetualSwap
        } else {
            MarketKind::Other
        };
        Market {
            id: self.symbol,
            kind,
        }
    }
}

impl FundingEntry {
    fn into_observation(self) -> Result<FundingObservation, ExchangeError> {
        let timestamp = self.funding_rate_timestamp.parse::<i64>().map_err(|_| {
            ExchangeError::UnexpectedData(format!(
                "invalid fundingRateTimestamp: {:?}",
                self.funding_rate_timestamp
            ))
        })?;
        let rate = parse_number("fundingRate", &self.funding_rate)?;
        Ok(FundingObservation::new(self.symbol, timestamp, rate))
    }
}

/// v5 REST client for USDT/USDC linear contracts.
pub struct Bybit {
    client: reqwest::Client,
}

impl Bybit {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_result<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExchangeError> {
        let url = format!("{BASE_URL}{path}");
        tracing::debug!("[bybit] GET {url}");

        let envelope = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Http(e))?
            .error_for_status()
            .map_err(|e| ExchangeError::Http(e))?
            .json::<Envelope>()
            .await
            .map_err(|e| ExchangeError::Http(e))?;

        envelope.into_result()
    }

    /// One page, newest first as Bybit returns it.
    async fn funding_page(
        &self,
        instrument: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<FundingObservation>, ExchangeError> {
        let mut path =
            format!("/v5/market/funding/history?category=linear&symbol={instrument}&limit={limit}");
        // startTime alone is rejected; endTime alone means "up to"
        if let Some(start) = start_time {
            path.push_str(&format!("&startTime={start}"));
        }
        if let Some(end) = end_time {
            path.push_str(&format!("&endTime={end}"));
        }

        let page: ListResult<FundingEntry> = self.get_result(&path).await?;
        page.list
            .into_iter()
            .map(FundingEntry::into_observation)
            .collect()
    }
}

#[async_trait]
impl Exchange for Bybit {
    fn name(&self) -> &'static str {
        "bybit"
    }

    async fn list_markets(&self) -> Result<Vec<Market>, ExchangeError> {
        let mut markets = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut path = format!(
                "/v5/market/instruments-info?category=linear&limit={INSTRUMENTS_PAGE_LIMIT}"
            );
            if !cursor.is_empty() {
                path.push_str(&format!("&cursor={cursor}"));
            }

            let page: ListResult<InstrumentInfo> = self.get_result(&path).await?;
            markets.extend(page.list.into_iter().map(InstrumentInfo::into_market));

            if page.next_page_cursor.is_empty() || page.next_page_cursor == cursor {
                break;
            }
            cursor = page.next_page_cursor;
        }

        Ok(markets)
    }

    /// Bybit serves the newest entries of a window first, so both cold and
    /// warm fetches page backwards from now. Cold fetches stop at `limit`
    /// entries, warm ones at `since`.
    async fn fetch_funding_history(
        &self,
        instrument: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<FundingObservation>, ExchangeError> {
        let mut history = match since {
            None => {
                let limit = limit.unwrap_or(FUNDING_PAGE_LIMIT);
                newest_observations(limit, FUNDING_PAGE_LIMIT, move |end, size| {
                    self.funding_page(instrument, None, end, size)
                })
                .await?
            }
            Some(since) => {
                let mut history = Vec::new();
                let mut end = now_ms();

                while end >= since {
                    let page = self
                        .funding_page(instrument, Some(since), Some(end), FUNDING_PAGE_LIMIT)
                        .await?;
                    let full = page.len() == FUNDING_PAGE_LIMIT;
                    let oldest = page.iter().map(|o| o.timestamp).min();
                    history.extend(page);

                    match oldest {
                        Some(ts) if full && ts < end => end = ts - 1,
                        _ => break,
                    }
                }
                history
            }
        };

        history.sort_by_key(|o| o.timestamp);
        Ok(history)
    }

    async fn fetch_open_interest(&self, instrument: &str) -> Result<OpenInterest, ExchangeError> {
        let path = format!(
            "/v5/market/open-interest?category=linear&symbol={instrument}&intervalTime=5min&limit=1"
        );
        let page: ListResult<OpenInterestEntry> = self.get_result(&path).await?;

        let latest = page.list.into_iter().next().ok_or_else(|| {
            ExchangeError::UnexpectedData(format!("Bybit returned no open interest for {instrument}"))
        })?;

        Ok(OpenInterest {
            amount: parse_number("openInterest", &latest.open_interest)?,
        })
    }

    async fn fetch_ticker(&self, instrument: &str) -> Result<Ticker, ExchangeError> {
        let path = format!("/v5/market/tickers?category=linear&symbol={instrument}");
        let page: ListResult<BybitTicker> = self.get_result(&path).await?;

        // list always has one item when querying by symbol
        let ticker = page.list.into_iter().next().ok_or_else(|| {
            ExchangeError::UnexpectedData(format!("Bybit returned empty list for {instrument}"))
        })?;

        Ok(Ticker {
            last_price: parse_number("lastPrice", &ticker.last_price)?,
            quote_volume_24h: parse_number("turnover24h", &ticker.turnover_24h)?,
            next_funding_rate: parse_number("fundingRate", &ticker.funding_rate)?,
        })
    }
}
