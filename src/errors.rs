use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Unexpected data from exchange: {0}")]
    UnexpectedData(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The file exists but its contents can't be trusted.
    #[error("malformed cache row {line}: {reason}")]
    Read { line: u64, reason: String },

    #[error("append skipped, the existing cache file could not be read this cycle")]
    AppendSkipped,
}

impl CacheError {
    /// The file could not be read at all, as opposed to read and found wanting.
    pub fn is_io(&self) -> bool {
        match self {
            CacheError::Io(_) => true,
            CacheError::Csv(e) => e.is_io_error(),
            _ => false,
        }
    }
}

/// Everything that can go wrong during one refresh cycle.
///
/// Only `SourceUnavailable` aborts a cycle. The rest are scoped to a single
/// instrument (or to the cache) and end up in the cycle report.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("market data source unavailable: {0}")]
    SourceUnavailable(#[source] ExchangeError),

    #[error("[{instrument}] funding history fetch failed: {source}")]
    Fetch {
        instrument: String,
        #[source]
        source: ExchangeError,
    },

    #[error("[{instrument}] snapshot fetch failed: {source}")]
    Snapshot {
        instrument: String,
        #[source]
        source: ExchangeError,
    },

    #[error("[{instrument}] only {available} observations for a {window}-period window")]
    InsufficientHistory {
        instrument: String,
        window: usize,
        available: usize,
    },

    #[error("cache read failed, continuing with empty cache: {0}")]
    CacheRead(#[source] CacheError),

    #[error("cache write failed: {0}")]
    CacheWrite(#[source] CacheError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
