//! Request traces and their composition with work estimators.
//!
//! A trace is a finite, replayable sequence of request records. The raw form
//! ([`TraceEntry`]) carries request sizes in bytes; composing a trace with an
//! [`Estimator`] yields [`ProcessedEntry`] records whose sizes have been
//! converted into generic "work" units. The MMBP modeler only ever consumes
//! the processed form, through the [`WorkTrace`] seam.
//!
//! Traces are single-consumer and not thread-safe.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{MeisterError, Result};
use crate::estimator::Estimator;

/// One raw request record from a trace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    /// Arrival time in nanoseconds, non-decreasing across the trace.
    pub arrival_ns: u64,
    /// Request size in bytes.
    pub size: u32,
    /// True for get requests, false for put requests.
    pub is_get: bool,
}

/// A replayable source of raw request records.
pub trait RequestTrace {
    /// Returns the next request, or `None` at end of trace.
    fn next_entry(&mut self) -> Option<TraceEntry>;
    /// Rewinds back to the beginning of the trace.
    fn reset(&mut self);
}

/// Reads and stores a request trace from a CSV file on open.
///
/// Each line has three columns: decimal arrival time in nanoseconds, request
/// size in hex bytes (no `0x` prefix), and `Get` or `Put`. Lines that fail to
/// parse are skipped.
#[derive(Debug)]
pub struct TraceReader {
    entries: Vec<TraceEntry>,
    cursor: usize,
}

impl TraceReader {
    /// Loads a trace file, retaining every parseable line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| MeisterError::TraceIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| MeisterError::TraceIo {
                path: path.to_path_buf(),
                source,
            })?;
            if let Some(entry) = parse_line(&line) {
                entries.push(entry);
            }
        }
        Ok(Self { entries, cursor: 0 })
    }

    /// Number of requests in the trace.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the trace holds no requests.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: &str) -> Option<TraceEntry> {
    let mut fields = line.split(',');
    let arrival_ns = fields.next()?.trim().parse::<u64>().ok()?;
    let size = u32::from_str_radix(fields.next()?.trim(), 16).ok()?;
    let kind = fields.next()?.trim();
    let is_get = match kind {
        "Get" => true,
        "Put" => false,
        _ => return None,
    };
    Some(TraceEntry {
        arrival_ns,
        size,
        is_get,
    })
}

impl RequestTrace for TraceReader {
    fn next_entry(&mut self) -> Option<TraceEntry> {
        let entry = self.entries.get(self.cursor).copied();
        if entry.is_some() {
            self.cursor += 1;
        }
        entry
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// One request record after work estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessedEntry {
    /// Arrival time in nanoseconds.
    pub arrival_ns: u64,
    /// Amount of work in the units defined by the estimator.
    pub work: f64,
    /// True for get requests, false for put requests.
    pub is_get: bool,
}

/// A replayable source of estimated-work records.
///
/// This is the seam the MMBP modeler consumes; production code feeds it a
/// [`ProcessedTrace`], tests feed it a [`ReplayTrace`].
pub trait WorkTrace {
    /// Returns the next processed request, or `None` at end of trace.
    fn next_entry(&mut self) -> Option<ProcessedEntry>;
    /// Rewinds the trace and resets any estimator state.
    fn reset(&mut self);
}

/// A raw trace composed with a work estimator.
#[derive(Debug)]
pub struct ProcessedTrace<T: RequestTrace> {
    trace: T,
    estimator: Estimator,
}

impl<T: RequestTrace> ProcessedTrace<T> {
    /// Composes `trace` with `estimator`.
    pub fn new(trace: T, estimator: Estimator) -> Self {
        Self { trace, estimator }
    }
}

impl<T: RequestTrace> WorkTrace for ProcessedTrace<T> {
    fn next_entry(&mut self) -> Option<ProcessedEntry> {
        self.trace.next_entry().map(|entry| ProcessedEntry {
            arrival_ns: entry.arrival_ns,
            work: self.estimator.estimate_work(entry.size, entry.is_get),
            is_get: entry.is_get,
        })
    }

    fn reset(&mut self) {
        self.trace.reset();
        self.estimator.reset();
    }
}

/// Replays an in-memory sequence of already-processed entries.
///
/// Used to model synthetic arrivals and to drive the MMBP pipeline in tests
/// without a trace file.
#[derive(Debug, Clone, Default)]
pub struct ReplayTrace {
    entries: Vec<ProcessedEntry>,
    cursor: usize,
}

impl ReplayTrace {
    /// Wraps a vector of processed entries.
    pub fn new(entries: Vec<ProcessedEntry>) -> Self {
        Self { entries, cursor: 0 }
    }
}

impl WorkTrace for ReplayTrace {
    fn next_entry(&mut self) -> Option<ProcessedEntry> {
        let entry = self.entries.get(self.cursor).copied();
        if entry.is_some() {
            self.cursor += 1;
        }
        entry
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_temp_trace(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = File::create(&path).expect("create temp trace");
        file.write_all(contents.as_bytes()).expect("write temp trace");
        path
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("1000,ff,Get"),
            Some(TraceEntry {
                arrival_ns: 1000,
                size: 0xff,
                is_get: true,
            })
        );
        assert_eq!(
            parse_line("2000,10,Put"),
            Some(TraceEntry {
                arrival_ns: 2000,
                size: 0x10,
                is_get: false,
            })
        );
        assert_eq!(parse_line("garbage"), None);
        assert_eq!(parse_line("1000,zz,Get"), None);
        assert_eq!(parse_line("1000,10,Post"), None);
    }

    #[test]
    fn test_reader_skips_bad_lines() {
        let path = write_temp_trace(
            "snc_meister_trace_skip.csv",
            "0,100,Get\nnot a line\n500,200,Put\n",
        );
        let mut reader = TraceReader::open(&path).expect("open trace");
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.next_entry().map(|e| e.arrival_ns), Some(0));
        assert_eq!(reader.next_entry().map(|e| e.arrival_ns), Some(500));
        assert_eq!(reader.next_entry(), None);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_reader_replays_identically() {
        let path = write_temp_trace(
            "snc_meister_trace_replay.csv",
            "0,a,Get\n100,b,Put\n200,c,Get\n",
        );
        let mut reader = TraceReader::open(&path).expect("open trace");
        let mut first = Vec::new();
        while let Some(entry) = reader.next_entry() {
            first.push(entry);
        }
        reader.reset();
        let mut second = Vec::new();
        while let Some(entry) = reader.next_entry() {
            second.push(entry);
        }
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(TraceReader::open("/definitely/not/a/real/trace.csv").is_err());
    }

    #[test]
    fn test_processed_trace_applies_estimator() {
        let path = write_temp_trace("snc_meister_trace_work.csv", "0,100,Get\n10,100,Put\n");
        let reader = TraceReader::open(&path).expect("open trace");
        let estimator = Estimator::network_in(1.0, 0.0, 2.0, 1.0);
        let mut processed = ProcessedTrace::new(reader, estimator);
        // Get is non-data for network-in: 1.0 + 0.0 * 256
        let entry = processed.next_entry().expect("first entry");
        assert!((entry.work - 1.0).abs() < 1e-12);
        // Put is data: 2.0 + 1.0 * 256
        let entry = processed.next_entry().expect("second entry");
        assert!((entry.work - 258.0).abs() < 1e-12);
        assert_eq!(processed.next_entry(), None);
        processed.reset();
        assert!(processed.next_entry().is_some());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_replay_trace_round_trip() {
        let entries = vec![
            ProcessedEntry {
                arrival_ns: 0,
                work: 0.5,
                is_get: true,
            },
            ProcessedEntry {
                arrival_ns: 10,
                work: 1.5,
                is_get: false,
            },
        ];
        let mut replay = ReplayTrace::new(entries.clone());
        assert_eq!(replay.next_entry(), Some(entries[0]));
        assert_eq!(replay.next_entry(), Some(entries[1]));
        assert_eq!(replay.next_entry(), None);
        replay.reset();
        assert_eq!(replay.next_entry(), Some(entries[0]));
    }
}
