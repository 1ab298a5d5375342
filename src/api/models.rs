use crate::models::SummaryRow;
use crate::report::CycleStatus;
use serde::Serialize;

/// Response for GET /funding
#[derive(Serialize)]
pub struct FundingTableResponse {
    pub status: CycleStatus,
    pub rows: Vec<SummaryRow>,
}

/// Response for GET /funding/{instrument}
#[derive(Serialize)]
pub struct InstrumentResponse {
    pub instrument: String,
    pub row: SummaryRow,
}
