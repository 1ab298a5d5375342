use crate::cache::FundingCache;
use crate::errors::RefreshError;
use crate::exchanges::Exchange;
use crate::models::FundingObservation;

/// How much history to ask the venue for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// Nothing cached yet: the most recent `limit` payments.
    Cold { limit: usize },
    /// Everything from the newest cached payment onwards (inclusive).
    Warm { since: i64 },
}

impl FetchPlan {
    pub fn for_instrument(cache: &FundingCache, instrument: &str, cold_limit: usize) -> Self {
        match cache.last_timestamp(instrument) {
            Some(since) => Self::Warm { since },
            None => Self::Cold { limit: cold_limit },
        }
    }
}

pub struct HistoryFetcher<'a> {
    exchange: &'a dyn Exchange,
    cold_limit: usize,
}

impl<'a> HistoryFetcher<'a> {
    pub fn new(exchange: &'a dyn Exchange, cold_limit: usize) -> Self {
        Self {
            exchange,
            cold_limit,
        }
    }

    pub fn plan(&self, cache: &FundingCache, instrument: &str) -> FetchPlan {
        FetchPlan::for_instrument(cache, instrument, self.cold_limit)
    }

    /// Raw history for one instrument, oldest first. Boundary duplicates are
    /// left in; the merge step drops them.
    pub async fn fetch(
        &self,
        instrument: &str,
        plan: FetchPlan,
    ) -> Result<Vec<FundingObservation>, RefreshError> {
        let (since, limit) = match plan {
            FetchPlan::Cold { limit } => (None, Some(limit)),
            FetchPlan::Warm { since } => (Some(since), None),
        };

        let mut history = self
            .exchange
            .fetch_funding_history(instrument, since, limit)
            .await
            .map_err(|source| RefreshError::Fetch {
                instrument: instrument.to_string(),
                source,
            })?;

        history.sort_by_key(|o| o.timestamp);
        tracing::debug!(
            "[{}] {instrument}: {plan:?} returned {} rows",
            self.exchange.name(),
            history.len()
        );
        Ok(history)
    }
}
