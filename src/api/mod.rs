pub mod handlers;
pub mod models;
pub mod router;

use crate::report::ReportStore;
use axum::Router;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use std::net::SocketAddr;

pub struct ApiServer {
    app: Router,
}

impl ApiServer {
    /// Installs the global Prometheus recorder, so build this before any
    /// refresh cycle runs or its metrics are lost.
    pub fn new(store: ReportStore) -> Self {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        let app = router::build(store)
            .route("/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);

        Self { app }
    }

    /// Binds the server to the given port and starts serving.
    pub async fn run(self, port: u16) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("API server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.app).await?;

        Ok(())
    }
}
