use super::fetcher::HistoryFetcher;
use super::instruments::list_perpetual_instruments;
use super::merge::merge;
use crate::cache::{CacheStore, FundingCache};
use crate::config::Config;
use crate::errors::{CacheError, RefreshError};
use crate::exchanges::Exchange;
use crate::models::{FundingObservation, InstrumentSnapshot, SummaryRow};
use crate::stats::Aggregator;
use futures_util::{StreamExt, stream};
use std::sync::Arc;

/// An instrument that dropped out of this cycle's table.
#[derive(Debug)]
pub struct InstrumentFailure {
    pub instrument: String,
    pub error: RefreshError,
}

/// Everything one cycle produced.
#[derive(Debug)]
pub struct RefreshReport {
    pub generated_at_ms: i64,
    /// Instruments the venue listed this cycle.
    pub instruments: usize,
    /// Ranked, best annualized latest rate first.
    pub rows: Vec<SummaryRow>,
    pub failures: Vec<InstrumentFailure>,
    /// Degraded but usable results: short windows, an unreadable cache.
    pub notices: Vec<RefreshError>,
    pub appended_rows: usize,
    pub cache_write_error: Option<RefreshError>,
}

impl RefreshReport {
    /// True when at least one instrument is missing from `rows`.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Default)]
struct InstrumentOutcome {
    appended: Vec<FundingObservation>,
    row: Option<SummaryRow>,
    failure: Option<InstrumentFailure>,
    notices: Vec<RefreshError>,
}

impl InstrumentOutcome {
    fn failed(instrument: &str, error: RefreshError) -> Self {
        Self {
            failure: Some(InstrumentFailure {
                instrument: instrument.to_string(),
                error,
            }),
            ..Self::default()
        }
    }
}

pub struct Refresher {
    exchange: Arc<dyn Exchange>,
    store: CacheStore,
    aggregator: Aggregator,
    allowlist: Vec<String>,
    cold_start_limit: usize,
    concurrency: usize,
}

impl Refresher {
    pub fn new(exchange: Arc<dyn Exchange>, store: CacheStore, config: &Config) -> Self {
        Self {
            exchange,
            store,
            aggregator: Aggregator::new(config.window_policy),
            allowlist: config.instruments.clone(),
            cold_start_limit: config.cold_start_limit,
            concurrency: config.refresh_concurrency.max(1),
        }
    }

    pub fn exchange_name(&self) -> &'static str {
        self.exchange.name()
    }

    /// Runs a single cycle.
    ///
    /// Only an unreachable instrument listing is fatal. Per-instrument
    /// failures land in the report and the cycle carries on.
    pub async fn refresh_once(&self) -> Result<RefreshReport, RefreshError> {
        let name = self.exchange.name();
        let recovered = self.store.load_or_empty();
        let cache = recovered.cache;
        let mut notices: Vec<RefreshError> = recovered
            .problems
            .into_iter()
            .map(RefreshError::CacheRead)
            .collect();

        let instruments =
            match list_perpetual_instruments(self.exchange.as_ref(), &self.allowlist).await {
                Ok(instruments) => instruments,
                Err(e) => {
                    metrics::counter!("funding_refresh_cycles_total", "outcome" => "failed")
                        .increment(1);
                    return Err(e);
                }
            };

        if cache.is_empty() {
            tracing::info!("[{name}] no cached history, cold start for every instrument");
        }
        tracing::info!(
            "[{name}] refreshing {} instruments ({} cached rows)",
            instruments.len(),
            cache.len()
        );

        let fetcher = HistoryFetcher::new(self.exchange.as_ref(), self.cold_start_limit);
        let (fetcher, cache_ref) = (&fetcher, &cache);
        let outcomes: Vec<InstrumentOutcome> = stream::iter(instruments.iter())
            .map(move |instrument| self.process(fetcher, cache_ref, instrument))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut appended = Vec::new();
        let mut rows = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            appended.extend(outcome.appended);
            rows.extend(outcome.row);
            notices.extend(outcome.notices);
            if let Some(failure) = outcome.failure {
                tracing::warn!("[{name}] {}", failure.error);
                failures.push(failure);
            }
        }

        let written = if recovered.appendable || appended.is_empty() {
            self.store.append(&appended)
        } else {
            Err(CacheError::AppendSkipped)
        };
        let (appended_rows, cache_write_error) = match written {
            Ok(n) => (n, None),
            Err(e) => {
                tracing::error!("[{name}] {} new rows not persisted: {e}", appended.len());
                (0, Some(RefreshError::CacheWrite(e)))
            }
        };
        metrics::counter!("funding_cache_rows_appended_total").increment(appended_rows as u64);

        let rows = Aggregator::rank(rows);
        let report = RefreshReport {
            generated_at_ms: chrono::Utc::now().timestamp_millis(),
            instruments: instruments.len(),
            rows,
            failures,
            notices,
            appended_rows,
            cache_write_error,
        };

        let outcome = if report.is_partial() { "partial" } else { "ok" };
        metrics::counter!("funding_refresh_cycles_total", "outcome" => outcome).increment(1);
        metrics::gauge!("funding_instruments_ranked").set(report.rows.len() as f64);
        tracing::info!(
            "[{name}] cycle done: {} ranked, {} failed, {} rows appended",
            report.rows.len(),
            report.failures.len(),
            report.appended_rows
        );

        Ok(report)
    }

    async fn process(
        &self,
        fetcher: &HistoryFetcher<'_>,
        cache: &FundingCache,
        instrument: &str,
    ) -> InstrumentOutcome {
        let plan = fetcher.plan(cache, instrument);
        let fetched = match fetcher.fetch(instrument, plan).await {
            Ok(fetched) => fetched,
            Err(e) => {
                metrics::counter!("funding_instrument_failures_total", "stage" => "history")
                    .increment(1);
                return InstrumentOutcome::failed(instrument, e);
            }
        };

        let merged = merge(instrument, cache.series(instrument), fetched);

        let snapshot = match self.snapshot(instrument).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                metrics::counter!("funding_instrument_failures_total", "stage" => "snapshot")
                    .increment(1);
                // history is still good, keep it
                return InstrumentOutcome {
                    appended: merged.appended,
                    ..InstrumentOutcome::failed(instrument, e)
                };
            }
        };

        let (row, notices) = self
            .aggregator
            .summarize(instrument, &merged.series, &snapshot);
        if row.is_none() {
            // listed, but the venue has no funding payments for it yet
            let empty = RefreshError::InsufficientHistory {
                instrument: instrument.to_string(),
                window: 1,
                available: 0,
            };
            return InstrumentOutcome::failed(instrument, empty);
        }

        InstrumentOutcome {
            appended: merged.appended,
            row,
            failure: None,
            notices,
        }
    }

    async fn snapshot(&self, instrument: &str) -> Result<InstrumentSnapshot, RefreshError> {
        let (ticker, open_interest) = tokio::try_join!(
            self.exchange.fetch_ticker(instrument),
            self.exchange.fetch_open_interest(instrument),
        )
        .map_err(|source| RefreshError::Snapshot {
            instrument: instrument.to_string(),
            source,
        })?;

        Ok(InstrumentSnapshot::from_parts(ticker, open_interest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::mock::MockExchange;
    use crate::stats::{PERIODS_PER_YEAR, WindowPolicy};
    use tempfile::TempDir;

    fn config(cold_start_limit: usize) -> Config {
        Config {
            cold_start_limit,
            refresh_concurrency: 2,
            window_policy: WindowPolicy::Omit,
            ..Config::default()
        }
    }

    fn refresher(exchange: MockExchange, dir: &TempDir, cold_start_limit: usize) -> Refresher {
        let store = CacheStore::new(dir.path().join("perp_data.csv"));
        Refresher::new(Arc::new(exchange), store, &config(cold_start_limit))
    }

    /// (instrument, timestamp) of every data row in the file, as written.
    fn rows_on_disk(dir: &TempDir) -> Vec<(String, i64)> {
        let mut reader = csv::Reader::from_path(dir.path().join("perp_data.csv")).unwrap();
        let header = reader.headers().unwrap().clone();
        let column = |name: &str| header.iter().position(|h| h == name).unwrap();
        let (future, timestamp) = (column("future"), column("timestamp"));

        reader
            .records()
            .map(|r| {
                let r = r.unwrap();
                (r[future].to_string(), r[timestamp].parse().unwrap())
            })
            .collect()
    }

    fn assert_unique(rows: &[(String, i64)]) {
        let keys: std::collections::HashSet<_> = rows.iter().collect();
        assert_eq!(keys.len(), rows.len(), "duplicate rows on disk: {rows:?}");
    }

    fn latest_order(report: &RefreshReport) -> Vec<&str> {
        report.rows.iter().map(|r| r.instrument.as_str()).collect()
    }

    #[tokio::test]
    async fn first_cycle_ranks_and_persists() {
        let dir = TempDir::new().unwrap();
        let exchange = MockExchange::new()
            .with_perp("AAAUSDT", &[0.0001, 0.0005])
            .with_perp("BBBUSDT", &[0.0003, -0.0002])
            .with_perp("CCCUSDT", &[0.0001, 0.001]);

        let report = refresher(exchange, &dir, 150).refresh_once().await.unwrap();

        assert_eq!(latest_order(&report), vec!["CCCUSDT", "AAAUSDT", "BBBUSDT"]);
        assert_eq!(report.rows[0].rank, 1);
        assert!((report.rows[0].annualized.latest - 0.001 * PERIODS_PER_YEAR).abs() < 1e-9);
        // 10 price * 5 contracts
        assert_eq!(report.rows[0].open_interest, 50.0);
        assert_eq!(report.appended_rows, 6);
        assert!(!report.is_partial());
        assert!(report.cache_write_error.is_none());

        let cached = CacheStore::new(dir.path().join("perp_data.csv")).load().unwrap();
        assert_eq!(cached.len(), 6);
    }

    #[tokio::test]
    async fn second_cycle_is_incremental() {
        let dir = TempDir::new().unwrap();
        let rates = [0.0001; 6];

        let first = refresher(MockExchange::new().with_perp("BTCUSDT", &rates[..4]), &dir, 150);
        assert_eq!(first.refresh_once().await.unwrap().appended_rows, 4);

        let exchange = MockExchange::new().with_perp("BTCUSDT", &rates);
        let second = Refresher::new(
            Arc::new(exchange),
            CacheStore::new(dir.path().join("perp_data.csv")),
            &config(150),
        );
        let report = second.refresh_once().await.unwrap();

        assert_eq!(report.appended_rows, 2);
        assert_eq!(report.rows[0].observations, 6);
        let on_disk = rows_on_disk(&dir);
        assert_eq!(on_disk.len(), 6);
        assert_unique(&on_disk);

        // a third run with nothing new appends nothing
        let report = second.refresh_once().await.unwrap();
        assert_eq!(report.appended_rows, 0);
        let on_disk = rows_on_disk(&dir);
        assert_eq!(on_disk.len(), 6);
        assert_unique(&on_disk);

        let cached = CacheStore::new(dir.path().join("perp_data.csv")).load().unwrap();
        assert_eq!(cached.len(), 6);
    }

    #[tokio::test]
    async fn repeated_cycles_never_rewrite_the_boundary_row() {
        let dir = TempDir::new().unwrap();
        let exchange = Arc::new(
            MockExchange::new()
                .with_perp("BTCUSDT", &[0.0001; 3])
                .with_perp("ETHUSDT", &[0.0002; 2]),
        );
        let refresher = Refresher::new(
            exchange,
            CacheStore::new(dir.path().join("perp_data.csv")),
            &config(150),
        );

        for _ in 0..3 {
            refresher.refresh_once().await.unwrap();
        }

        let on_disk = rows_on_disk(&dir);
        assert_eq!(on_disk.len(), 5);
        assert_unique(&on_disk);
    }

    #[tokio::test]
    async fn warm_start_asks_from_last_cached_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("perp_data.csv"));
        store
            .append(&[FundingObservation::new("BTCUSDT", 2 * 3_600_000, 0.0001)])
            .unwrap();

        let exchange = Arc::new(
            MockExchange::new()
                .with_perp("BTCUSDT", &[0.0001; 3])
                .with_perp("ETHUSDT", &[0.0001; 3]),
        );
        let refresher = Refresher::new(exchange.clone(), store, &config(150));
        refresher.refresh_once().await.unwrap();

        let mut calls = exchange.history_calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("BTCUSDT".to_string(), Some(2 * 3_600_000), None),
                ("ETHUSDT".to_string(), None, Some(150)),
            ]
        );
    }

    #[tokio::test]
    async fn failing_instrument_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut exchange = MockExchange::new()
            .with_perp("BTCUSDT", &[0.0001])
            .with_perp("ETHUSDT", &[0.0002]);
        exchange.failing_history.insert("BTCUSDT".to_string());

        let report = refresher(exchange, &dir, 150).refresh_once().await.unwrap();

        assert!(report.is_partial());
        assert_eq!(latest_order(&report), vec!["ETHUSDT"]);
        assert!(matches!(
            report.failures[0].error,
            RefreshError::Fetch { ref instrument, .. } if instrument == "BTCUSDT"
        ));
    }

    #[tokio::test]
    async fn missing_snapshot_drops_row_but_keeps_history() {
        let dir = TempDir::new().unwrap();
        let mut exchange = MockExchange::new()
            .with_perp("BTCUSDT", &[0.0001, 0.0002])
            .with_perp("ETHUSDT", &[0.0002]);
        exchange.tickers.remove("BTCUSDT");

        let report = refresher(exchange, &dir, 150).refresh_once().await.unwrap();

        assert_eq!(latest_order(&report), vec!["ETHUSDT"]);
        assert!(matches!(report.failures[0].error, RefreshError::Snapshot { .. }));
        assert_eq!(report.appended_rows, 3);
    }

    #[tokio::test]
    async fn unreachable_source_fails_the_cycle() {
        let dir = TempDir::new().unwrap();
        let exchange = MockExchange {
            unreachable: true,
            ..MockExchange::new()
        };

        let result = refresher(exchange, &dir, 150).refresh_once().await;
        assert!(matches!(result, Err(RefreshError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn corrupt_cache_is_a_notice_not_a_failure() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("perp_data.csv"), "garbage\n\"unterminated").unwrap();

        let exchange = MockExchange::new().with_perp("BTCUSDT", &[0.0001]);
        let report = refresher(exchange, &dir, 150).refresh_once().await.unwrap();

        assert!(!report.is_partial());
        assert!(report.notices.iter().any(|n| matches!(n, RefreshError::CacheRead(_))));
        assert_eq!(report.appended_rows, 1);
    }

    #[tokio::test]
    async fn instrument_without_history_counts_as_missing() {
        let dir = TempDir::new().unwrap();
        let exchange = MockExchange::new()
            .with_perp("BTCUSDT", &[0.0001])
            .with_perp("NEWUSDT", &[]);

        let report = refresher(exchange, &dir, 150).refresh_once().await.unwrap();

        assert!(report.is_partial());
        assert_eq!(latest_order(&report), vec!["BTCUSDT"]);
        assert!(matches!(
            report.failures[0].error,
            RefreshError::InsufficientHistory { available: 0, .. }
        ));
    }

    #[tokio::test]
    async fn cold_start_respects_limit() {
        let dir = TempDir::new().unwrap();
        let exchange = MockExchange::new().with_perp("BTCUSDT", &[0.0001; 20]);

        let report = refresher(exchange, &dir, 5).refresh_once().await.unwrap();

        assert_eq!(report.rows[0].observations, 5);
        assert_eq!(report.appended_rows, 5);
    }

    #[tokio::test]
    async fn unreadable_cache_is_not_appended_to() {
        let dir = TempDir::new().unwrap();
        // a directory where the file should be: opens, but can't be read
        std::fs::create_dir(dir.path().join("perp_data.csv")).unwrap();

        let exchange = MockExchange::new().with_perp("BTCUSDT", &[0.0001]);
        let report = refresher(exchange, &dir, 150).refresh_once().await.unwrap();

        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.appended_rows, 0);
        assert!(matches!(
            report.cache_write_error,
            Some(RefreshError::CacheWrite(CacheError::AppendSkipped))
        ));
        assert!(report.notices.iter().any(|n| matches!(n, RefreshError::CacheRead(_))));
    }

    #[tokio::test]
    async fn cache_write_failure_keeps_results() {
        let dir = TempDir::new().unwrap();
        // reads see a missing file, but the parent can never be created
        let parent = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("nowhere"), &parent).unwrap();
        let path = parent.join("perp_data.csv");

        let exchange = MockExchange::new().with_perp("BTCUSDT", &[0.0001]);
        let refresher = Refresher::new(Arc::new(exchange), CacheStore::new(&path), &config(150));
        let report = refresher.refresh_once().await.unwrap();

        assert_eq!(report.rows.len(), 1);
        assert!(!report.notices.iter().any(|n| matches!(n, RefreshError::CacheRead(_))));
        assert!(matches!(
            report.cache_write_error,
            Some(RefreshError::CacheWrite(CacheError::Io(_)))
        ));
    }
}
