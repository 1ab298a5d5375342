mod api;
mod cache;
mod config;
mod errors;
mod exchanges;
mod models;
mod pipeline;
mod report;
mod stats;

use api::ApiServer;
use cache::CacheStore;
use config::{Config, LogFormat};
use errors::RefreshError;
use pipeline::{RefreshReport, Refresher};
use report::ReportStore;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn pct(rate: Option<f64>) -> String {
    rate.map(|r| format!("{:.2}%", r * 100.0))
        .unwrap_or_else(|| "-".to_string())
}

fn log_top(report: &RefreshReport, count: usize) {
    tracing::info!("=== TOP FUNDING (annualized) ===");
    for row in report.rows.iter().take(count) {
        let a = &row.annualized;
        tracing::info!(
            "#{} {}: vol=${:.0} oi=${:.0} next={} 1h={} 3h={} 1d={} 3d={} 7d={} 14d={} 30d={}",
            row.rank,
            row.instrument,
            row.volume_24h,
            row.open_interest,
            pct(Some(row.next_funding)),
            pct(Some(a.latest)),
            pct(a.periods_3),
            pct(a.day_1),
            pct(a.days_3),
            pct(a.days_7),
            pct(a.days_14),
            pct(a.days_30)
        );
    }
    if report.is_partial() {
        tracing::warn!("{} instruments missing this cycle", report.failures.len());
    }
}

fn publish(reports: &ReportStore, result: Result<RefreshReport, RefreshError>) {
    match result {
        Ok(report) => {
            reports.publish(&report);
            log_top(&report, 10);
        }
        Err(e) => {
            tracing::error!("refresh cycle failed: {e}");
            reports.publish_failure(&e, chrono::Utc::now().timestamp_millis());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let exchange = exchanges::build(config.exchange)?;
    let refresher = Refresher::new(exchange, CacheStore::new(&config.cache_path), &config);
    let reports = ReportStore::new(refresher.exchange_name());

    tracing::info!(
        "Funding tracker starting: {} every {} min, cache {}",
        refresher.exchange_name(),
        config.refresh_interval_mins,
        config.cache_path.display()
    );

    // ── 1. Serve the latest table over HTTP ────────────────────────
    let server = ApiServer::new(reports.clone());
    let port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = server.run(port).await {
            tracing::error!("API server stopped: {e}");
        }
    });

    // ── 2. Refresh on a fixed schedule until Ctrl+C ────────────────
    let mut interval =
        tokio::time::interval(Duration::from_secs(config.refresh_interval_mins * 60));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => break,
        }

        // a cycle in flight is dropped on Ctrl+C; appends happen in one go at its end
        tokio::select! {
            result = refresher.refresh_once() => publish(&reports, result),
            _ = &mut shutdown => {
                tracing::warn!("interrupted mid-cycle");
                break;
            }
        }
    }

    tracing::info!("Shutting down...");
    Ok(())
}
