use crate::cache::FundingCache;
use crate::errors::CacheError;
use crate::models::FundingObservation;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind};
use std::path::PathBuf;

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const INSTRUMENT_COLUMN: &str = "future";
pub const RATE_COLUMN: &str = "fundingRate";

/// Append-only CSV file of funding observations.
///
/// Assumes a single writer: one process owns the file for its lifetime.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

/// What [`CacheStore::load_or_empty`] could recover.
#[derive(Debug)]
pub struct Recovered {
    pub cache: FundingCache,
    /// Skipped rows, or the reason the whole file was dropped.
    pub problems: Vec<CacheError>,
    pub appendable: bool,
}

/// Column positions resolved from a header row.
struct Layout {
    timestamp: usize,
    instrument: usize,
    rate: usize,
    header: Vec<String>,
}

impl Layout {
    fn from_header(header: &StringRecord) -> Result<Self, CacheError> {
        let find = |name: &str| {
            header.iter().position(|h| h == name).ok_or_else(|| CacheError::Read {
                line: 1,
                reason: format!("missing column {name}"),
            })
        };

        Ok(Self {
            timestamp: find(TIMESTAMP_COLUMN)?,
            instrument: find(INSTRUMENT_COLUMN)?,
            rate: find(RATE_COLUMN)?,
            header: header.iter().map(str::to_string).collect(),
        })
    }

    /// Base columns first, then every extra field present in `rows`, sorted.
    fn for_new_file(rows: &[FundingObservation]) -> Self {
        let extras: BTreeSet<&str> = rows
            .iter()
            .flat_map(|o| o.extra.keys().map(String::as_str))
            .filter(|k| ![TIMESTAMP_COLUMN, INSTRUMENT_COLUMN, RATE_COLUMN].contains(k))
            .collect();

        let mut header = vec![
            TIMESTAMP_COLUMN.to_string(),
            INSTRUMENT_COLUMN.to_string(),
            RATE_COLUMN.to_string(),
        ];
        header.extend(extras.into_iter().map(str::to_string));

        Self {
            timestamp: 0,
            instrument: 1,
            rate: 2,
            header,
        }
    }

    fn decode(&self, record: &StringRecord, line: u64) -> Result<FundingObservation, CacheError> {
        let field = |idx: usize| record.get(idx).unwrap_or_default().trim();
        let malformed = |reason: String| CacheError::Read { line, reason };

        let timestamp = parse_timestamp(field(self.timestamp))
            .ok_or_else(|| malformed(format!("bad timestamp {:?}", field(self.timestamp))))?;
        let funding_rate = field(self.rate)
            .parse::<f64>()
            .map_err(|_| malformed(format!("bad funding rate {:?}", field(self.rate))))?;
        let instrument = field(self.instrument);
        if instrument.is_empty() {
            return Err(malformed("empty instrument".to_string()));
        }

        let mut observation = FundingObservation::new(instrument, timestamp, funding_rate);
        for (idx, name) in self.header.iter().enumerate() {
            if idx == self.timestamp || idx == self.instrument || idx == self.rate {
                continue;
            }
            if let Some(value) = record.get(idx).filter(|v| !v.is_empty()) {
                observation.extra.insert(name.clone(), value.to_string());
            }
        }
        Ok(observation)
    }

    fn encode(&self, observation: &FundingObservation) -> Vec<String> {
        self.header
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                if idx == self.timestamp {
                    observation.timestamp.to_string()
                } else if idx == self.instrument {
                    observation.instrument.clone()
                } else if idx == self.rate {
                    observation.funding_rate.to_string()
                } else {
                    observation.extra.get(name).cloned().unwrap_or_default()
                }
            })
            .collect()
    }
}

/// Accepts plain integers and integral floats ("1650000000000.0").
fn parse_timestamp(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads every persisted row. A missing or empty file is an empty cache.
    /// Rows that don't parse are skipped; see [`load_or_empty`](Self::load_or_empty).
    pub fn load(&self) -> Result<FundingCache, CacheError> {
        self.read().map(|(cache, _)| cache)
    }

    fn read(&self) -> Result<(FundingCache, Vec<CacheError>), CacheError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok((FundingCache::new(), Vec::new()));
            }
            Err(e) => return Err(e.into()),
        };

        // short rows reach decode() and are rejected there
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);
        let header = reader.headers()?.clone();
        if header.is_empty() {
            return Ok((FundingCache::new(), Vec::new()));
        }
        let layout = Layout::from_header(&header)?;

        let mut rows = Vec::new();
        let mut skipped = Vec::new();
        for (i, record) in reader.records().enumerate() {
            // line 1 is the header
            let line = i as u64 + 2;
            let decoded = match record {
                Ok(record) => layout.decode(&record, line),
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => Err(CacheError::Read {
                    line,
                    reason: e.to_string(),
                }),
            };
            match decoded {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!("cache {}: skipping {e}", self.path.display());
                    skipped.push(e);
                }
            }
        }

        Ok((FundingCache::from_rows(rows), skipped))
    }

    /// Like [`load`](Self::load), but never fails.
    ///
    /// Skipped rows come back as problems alongside the rows that parsed. A
    /// file whose header is unusable is moved aside and treated as absent. A
    /// file that can't be read at all is left where it is, and the result is
    /// marked not appendable so this cycle doesn't write duplicates into it.
    pub fn load_or_empty(&self) -> Recovered {
        match self.read() {
            Ok((cache, problems)) => Recovered {
                cache,
                problems,
                appendable: true,
            },
            Err(e) if e.is_io() => {
                tracing::warn!(
                    "cache {} could not be read, leaving it in place: {e}",
                    self.path.display()
                );
                Recovered {
                    cache: FundingCache::new(),
                    problems: vec![e],
                    appendable: false,
                }
            }
            Err(e) => {
                tracing::warn!("cache {} unreadable, starting empty: {e}", self.path.display());
                let appendable = self.quarantine();
                Recovered {
                    cache: FundingCache::new(),
                    problems: vec![e],
                    appendable,
                }
            }
        }
    }

    /// Returns false if the file is still in the way.
    fn quarantine(&self) -> bool {
        let stamp = chrono::Utc::now().timestamp_millis();
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".corrupt-{stamp}"));

        match fs::rename(&self.path, &aside) {
            Ok(()) => {
                tracing::warn!("moved unreadable cache to {}", PathBuf::from(&aside).display());
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                tracing::error!("could not move unreadable cache aside: {e}");
                false
            }
        }
    }

    /// Appends rows to the file, writing the header only when the file is new.
    /// Callers pass rows not yet persisted; nothing already on disk is touched.
    pub fn append(&self, rows: &[FundingObservation]) -> Result<usize, CacheError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let layout = match self.existing_header()? {
            Some(header) => Layout::from_header(&header)?,
            None => {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                let layout = Layout::for_new_file(rows);
                let mut writer = WriterBuilder::new().from_path(&self.path)?;
                writer.write_record(&layout.header)?;
                writer.flush()?;
                layout
            }
        };

        let dropped: BTreeSet<&str> = rows
            .iter()
            .flat_map(|o| o.extra.keys())
            .filter(|k| !layout.header.contains(*k))
            .map(String::as_str)
            .collect();
        if !dropped.is_empty() {
            tracing::debug!("cache header has no column for {dropped:?}, dropping those fields");
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        for row in rows {
            writer.write_record(layout.encode(row))?;
        }
        writer.flush()?;

        Ok(rows.len())
    }

    fn existing_header(&self) -> Result<Option<StringRecord>, CacheError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let header = reader.headers()?.clone();
        Ok((!header.is_empty()).then_some(header))
    }
}
