//! One refresh cycle: list instruments, fetch and merge history per
//! instrument, then rank the aggregated rows.

pub mod fetcher;
pub mod instruments;
pub mod merge;
pub mod refresh;

pub use refresh::{InstrumentFailure, RefreshReport, Refresher};
