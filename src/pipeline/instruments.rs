use crate::errors::RefreshError;
use crate::exchanges::Exchange;
use crate::models::MarketKind;
use std::collections::HashSet;

/// Perpetual swaps the venue lists, deduplicated in listing order.
/// A non-empty `allowlist` keeps only the named instruments.
pub async fn list_perpetual_instruments(
    exchange: &dyn Exchange,
    allowlist: &[String],
) -> Result<Vec<String>, RefreshError> {
    let markets = exchange
        .list_markets()
        .await
        .map_err(RefreshError::SourceUnavailable)?;

    let mut seen = HashSet::new();
    let instruments: Vec<String> = markets
        .into_iter()
        .filter(|m| m.kind == MarketKind::PerpetualSwap)
        .filter(|m| allowlist.is_empty() || allowlist.contains(&m.id))
        .filter(|m| seen.insert(m.id.clone()))
        .map(|m| m.id)
        .collect();

    tracing::debug!(
        "[{}] {} perpetual instruments listed",
        exchange.name(),
        instruments.len()
    );
    Ok(instruments)
}
