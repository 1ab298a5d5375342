use super::{CycleState, CycleStatus, FailureView, Published};
use crate::errors::RefreshError;
use crate::models::SummaryRow;
use crate::pipeline::RefreshReport;
use std::sync::{Arc, RwLock};

/// Latest published funding table, shared between the scheduler and the API.
///
/// Each cycle builds a whole new [`Published`] and swaps it in, so readers
/// always see the rows and status of one cycle together.
#[derive(Clone)]
pub struct ReportStore {
    current: Arc<RwLock<Arc<Published>>>,
}

impl ReportStore {
    pub fn new(exchange: &'static str) -> Self {
        let pending = Published {
            rows: Vec::new(),
            status: CycleStatus::pending(exchange),
        };
        Self {
            current: Arc::new(RwLock::new(Arc::new(pending))),
        }
    }

    /// Replaces the table with a finished cycle's rows.
    pub fn publish(&self, report: &RefreshReport) {
        let previous = self.snapshot();
        let mut rows = report.rows.clone();
        rows.sort_by_key(|r| r.rank);

        let status = CycleStatus {
            exchange: previous.status.exchange,
            state: if report.is_partial() {
                CycleState::Partial
            } else {
                CycleState::Ok
            },
            last_attempt_ms: Some(report.generated_at_ms),
            last_success_ms: Some(report.generated_at_ms),
            instruments: report.instruments,
            failures: report.failures.iter().map(FailureView::from).collect(),
            notices: report.notices.len(),
            appended_rows: report.appended_rows,
            cache_write_error: report.cache_write_error.as_ref().map(ToString::to_string),
            error: None,
        };

        self.swap(Published { rows, status });
    }

    /// Records a cycle that produced nothing. The table is cleared.
    pub fn publish_failure(&self, error: &RefreshError, at_ms: i64) {
        let previous = self.snapshot();
        let status = CycleStatus {
            state: CycleState::Failed,
            last_attempt_ms: Some(at_ms),
            last_success_ms: previous.status.last_success_ms,
            error: Some(error.to_string()),
            ..CycleStatus::pending(previous.status.exchange)
        };

        self.swap(Published {
            rows: Vec::new(),
            status,
        });
    }

    fn swap(&self, next: Published) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(next);
    }

    /// The latest cycle's rows and status, read together.
    pub fn snapshot(&self) -> Arc<Published> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get(&self, instrument: &str) -> Option<SummaryRow> {
        self.snapshot()
            .rows
            .iter()
            .find(|r| r.instrument == instrument)
            .cloned()
    }

    pub fn status(&self) -> CycleStatus {
        self.snapshot().status.clone()
    }
}
