//! CSV trace source for replaying recorded demand.
//!
//! A trace file holds one row per second of wall time in the form
//! `second,concurrency`. Only the second column is used; rows are replayed in
//! file order. An optional header row is skipped when its first field is not
//! an integer.
//!
//! ```csv
//! second,concurrency
//! 0,64
//! 1,80
//! 2,128
//! ```

use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur when loading a trace file.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to open trace file: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace read error line {line}: {source}")]
    Csv {
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("trace line {line}: need 2 columns (second,concurrency)")]
    MissingColumn { line: u64 },

    #[error("trace line {line}: bad concurrency value {value:?}")]
    BadConcurrency { line: u64, value: String },

    #[error("trace file has no data rows")]
    Empty,
}

/// Load a per-second concurrency trace from a CSV file.
pub fn load_trace<P: AsRef<Path>>(path: P) -> Result<Vec<usize>, TraceError> {
    let path_ref = path.as_ref();
    info!(path = ?path_ref, "Loading trace file");

    let file = File::open(path_ref)?;
    let trace = parse_trace(file)?;

    info!(
        path = ?path_ref,
        seconds = trace.len(),
        "Trace loaded successfully"
    );
    Ok(trace)
}

/// Parse trace rows from any reader.
///
/// Negative concurrency values are clamped to zero.
pub fn parse_trace<R: Read>(reader: R) -> Result<Vec<usize>, TraceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut out = Vec::new();
    let mut first = true;

    for result in reader.records() {
        let record = result.map_err(|source| TraceError::Csv {
            line: source.position().map(|p| p.line()).unwrap_or(0),
            source,
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if record.is_empty() {
            continue;
        }

        if first {
            first = false;
            let is_header = record
                .get(0)
                .map(|f| f.parse::<i64>().is_err())
                .unwrap_or(false);
            if is_header {
                debug!(line = line, "Skipping trace header row");
                continue;
            }
        }

        let value = record.get(1).ok_or(TraceError::MissingColumn { line })?;
        let concurrency: i64 = value.parse().map_err(|_| TraceError::BadConcurrency {
            line,
            value: value.to_string(),
        })?;

        out.push(concurrency.max(0) as usize);
    }

    if out.is_empty() {
        return Err(TraceError::Empty);
    }

    Ok(out)
}
