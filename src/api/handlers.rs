use super::models::{FundingTableResponse, InstrumentResponse};
use crate::report::{CycleStatus, ReportStore};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

/// GET /health: simple liveness check
pub async fn health() -> &'static str {
    "OK"
}

/// GET /funding: the ranked table plus the state of the cycle that produced it
pub async fn get_funding_table(State(store): State<ReportStore>) -> Json<FundingTableResponse> {
    let published = store.snapshot();
    Json(FundingTableResponse {
        status: published.status.clone(),
        rows: published.rows.clone(),
    })
}

/// GET /funding/{instrument}: one row (e.g. BTCUSDT)
pub async fn get_instrument(
    State(store): State<ReportStore>,
    Path(instrument): Path<String>,
) -> Result<Json<InstrumentResponse>, StatusCode> {
    let instrument = instrument.to_uppercase();
    let row = store.get(&instrument).ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(InstrumentResponse { instrument, row }))
}

/// GET /status
pub async fn get_status(State(store): State<ReportStore>) -> Json<CycleStatus> {
    Json(store.status())
}
