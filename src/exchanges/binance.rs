use super::{Exchange, newest_observations, parse_number};
use crate::errors::ExchangeError;
use crate::models::{FundingObservation, Market, MarketKind, OpenInterest, Ticker};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

const BASE_URL: &str = "https://fapi.binance.com";
/// Largest page the fundingRate endpoint serves.
const FUNDING_PAGE_LIMIT: usize = 1000;

/// Binance reports failures as `{"code": -1121, "msg": "Invalid symbol."}`
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,

    #[serde(rename = "contractType", default)]
    contract_type: String,

    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct FundingRateEntry {
    symbol: String,

    #[serde(rename = "fundingTime")]
    funding_time: i64,

    #[serde(rename = "fundingRate")]
    funding_rate: String,

    #[serde(rename = "markPrice", default)]
    mark_price: String,
}

#[derive(Debug, Deserialize)]
struct OpenInterestResponse {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct Ticker24hResponse {
    #[serde(rename = "lastPrice")]
    last_price: String,

    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

/// premiumIndex; only the funding field is read
#[derive(Debug, Deserialize)]
struct PremiumIndexResponse {
    /// Despite the name, this is the rate for the upcoming settlement.
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: String,
}

impl SymbolInfo {
    fn into_market(self) -> Market {
        let kind = if self.contract_type == "PERPETUAL" && self.status == "TRADING" {
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

impl FundingRateEntry {
    fn into_observation(self) -> Result<FundingObservation, ExchangeError> {
        let rate = parse_number("fundingRate", &self.funding_rate)?;
        let observation = FundingObservation::new(self.symbol, self.funding_time, rate);
        // older entries carry an empty markPrice
        if self.mark_price.is_empty() {
            return Ok(observation);
        }
        Ok(observation.with_extra("markPrice", self.mark_price))
    }
}

/// USDⓈ-M futures REST client.
pub struct Binance {
    client: reqwest::Client,
}

impl Binance {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExchangeError> {
        let url = format!("{BASE_URL}{path}");
        tracing::debug!("[binance] GET {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Http(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ExchangeError::Http(e))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => ExchangeError::Api {
                    code: err.code,
                    message: err.msg,
                },
                Err(_) => ExchangeError::UnexpectedData(format!("HTTP {status}: {body}")),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn funding_page(
        &self,
        instrument: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<FundingObservation>, ExchangeError> {
        let mut path = format!("/fapi/v1/fundingRate?symbol={instrument}&limit={limit}");
        if let Some(start) = start_time {
            path.push_str(&format!("&startTime={start}"));
        }
        if let Some(end) = end_time {
            path.push_str(&format!("&endTime={end}"));
        }

        let entries: Vec<FundingRateEntry> = self.get_json(&path).await?;
        entries
            .into_iter()
            .map(FundingRateEntry::into_observation)
            .collect()
    }
}

#[async_trait]
impl Exchange for Binance {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn list_markets(&self) -> Result<Vec<Market>, ExchangeError> {
        let info: ExchangeInfoResponse = self.get_json("/fapi/v1/exchangeInfo").await?;
        Ok(info.symbols.into_iter().map(SymbolInfo::into_market).collect())
    }

    /// Without `since`, pages walk backwards with `endTime` until `limit`
    /// entries are collected. With it, pages walk forward from `startTime`
    /// until a short page comes back.
    async fn fetch_funding_history(
        &self,
        instrument: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<FundingObservation>, ExchangeError> {
        let Some(mut cursor) = since else {
            let limit = limit.unwrap_or(FUNDING_PAGE_LIMIT);
            return newest_observations(limit, FUNDING_PAGE_LIMIT, move |end, size| {
                self.funding_page(instrument, None, end, size)
            })
            .await;
        };

        let mut history = Vec::new();
        loop {
            let page = self
                .funding_page(instrument, Some(cursor), None, FUNDING_PAGE_LIMIT)
                .await?;
            let full = page.len() == FUNDING_PAGE_LIMIT;
            let newest = page.iter().map(|o| o.timestamp).max();
            history.extend(page);

            match newest {
                Some(ts) if full && ts >= cursor => cursor = ts + 1,
                _ => break,
            }
        }

        Ok(history)
    }

    async fn fetch_open_interest(&self, instrument: &str) -> Result<OpenInterest, ExchangeError> {
        let response: OpenInterestResponse = self
            .get_json(&format!("/fapi/v1/openInterest?symbol={instrument}"))
            .await?;

        Ok(OpenInterest {
            amount: parse_number("openInterest", &response.open_interest)?,
        })
    }

    /// Joins the 24h ticker with premiumIndex, which carries the next funding rate.
    async fn fetch_ticker(&self, instrument: &str) -> Result<Ticker, ExchangeError> {
        let ticker_path = format!("/fapi/v1/ticker/24hr?symbol={instrument}");
        let premium_path = format!("/fapi/v1/premiumIndex?symbol={instrument}");

        let (ticker, premium) = tokio::try_join!(
            self.get_json::<Ticker24hResponse>(&ticker_path),
            self.get_json::<PremiumIndexResponse>(&premium_path),
        )?;

        Ok(Ticker {
            last_price: parse_number("lastPrice", &ticker.last_price)?,
            quote_volume_24h: parse_number("quoteVolume", &ticker.quote_volume)?,
            next_funding_rate: parse_number("lastFundingRate", &premium.last_funding_rate)?,
        })
    }
}
