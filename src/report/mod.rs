pub mod store;

use crate::models::SummaryRow;
use crate::pipeline::InstrumentFailure;
use serde::Serialize;
pub use store::ReportStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// No cycle has finished yet.
    Pending,
    Ok,
    /// Some instruments are missing from the table.
    Partial,
    /// Nothing could be computed this cycle.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureView {
    pub instrument: String,
    pub error: String,
}

impl From<&InstrumentFailure> for FailureView {
    fn from(failure: &InstrumentFailure) -> Self {
        Self {
            instrument: failure.instrument.clone(),
            error: failure.error.to_string(),
        }
    }
}

/// What the presentation side knows about the latest cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleStatus {
    pub exchange: &'static str,
    pub state: CycleState,
    pub last_attempt_ms: Option<i64>,
    pub last_success_ms: Option<i64>,
    pub instruments: usize,
    pub failures: Vec<FailureView>,
    pub notices: usize,
    pub appended_rows: usize,
    pub cache_write_error: Option<String>,
    pub error: Option<String>,
}

impl CycleStatus {
    pub fn pending(exchange: &'static str) -> Self {
        Self {
            exchange,
            state: CycleState::Pending,
            last_attempt_ms: None,
            last_success_ms: None,
            instruments: 0,
            failures: Vec::new(),
            notices: 0,
            appended_rows: 0,
            cache_write_error: None,
            error: None,
        }
    }
}

/// One cycle's output as the API serves it.
#[derive(Debug)]
pub struct Published {
    /// Best rank first.
    pub rows: Vec<SummaryRow>,
    pub status: CycleStatus,
}
