//! Append-only snapshot log with CSV export.
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::aggregator::STATEWIDE_SCOPE;
use crate::classifier::Rag;
use crate::error::{ExportError, LoadError};
use crate::types::{CountyRecord, StatewideSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    County(String),
    Statewide,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::County(name) => f.write_str(name),
            Scope::Statewide => f.write_str(STATEWIDE_SCOPE),
        }
    }
}

impl From<&str> for Scope {
    fn from(s: &str) -> Self {
        if s == STATEWIDE_SCOPE {
            Scope::Statewide
        } else {
            Scope::County(s.to_string())
        }
    }
}

/// The metric set stored with each history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSet {
    pub fte_on: f64,
    pub ap: f64,
    pub capacity: f64,
    pub utilization: Option<f64>,
    pub fte_required: f64,
    pub gap: f64,
    pub rag: Rag,
}

impl From<&CountyRecord> for MetricSet {
    fn from(r: &CountyRecord) -> Self {
        Self {
            fte_on: r.inputs.fte_on,
            ap: r.inputs.ap,
            capacity: r.metrics.capacity,
            utilization: r.metrics.utilization,
            fte_required: r.metrics.fte_required,
            gap: r.metrics.gap,
            rag: r.metrics.rag,
        }
    }
}

impl From<&StatewideSummary> for MetricSet {
    fn from(s: &StatewideSummary) -> Self {
        Self {
            fte_on: s.fte_on,
            ap: s.ap,
            capacity: s.capacity,
            utilization: s.utilization,
            fte_required: s.fte_required,
            gap: s.gap,
            rag: s.rag,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub scope: Scope,
    pub metrics: MetricSet,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Scope")]
    scope: String,
    #[serde(rename = "FTE_on")]
    fte_on: f64,
    #[serde(rename = "AP")]
    ap: f64,
    #[serde(rename = "Capacity")]
    capacity: f64,
    #[serde(rename = "Utilization")]
    utilization: Option<f64>,
    #[serde(rename = "FTE_required")]
    fte_required: f64,
    #[serde(rename = "Gap")]
    gap: f64,
    #[serde(rename = "RAG")]
    rag: String,
}

impl From<&HistoryEntry> for HistoryRow {
    fn from(e: &HistoryEntry) -> Self {
        Self {
            timestamp: e.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            scope: e.scope.to_string(),
            fte_on: e.metrics.fte_on,
            ap: e.metrics.ap,
            capacity: e.metrics.capacity,
            utilization: e.metrics.utilization,
            fte_required: e.metrics.fte_required,
            gap: e.metrics.gap,
            rag: e.metrics.rag.as_str().to_string(),
        }
    }
}

pub const HISTORY_HEADER: [&str; 9] = [
    "Timestamp",
    "Scope",
    "FTE_on",
    "AP",
    "Capacity",
    "Utilization",
    "FTE_required",
    "Gap",
    "RAG",
];

/// Entries are only ever pushed; there is no API to edit or remove one.
#[derive(Debug, Default, Clone)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(
        &mut self,
        scope: Scope,
        timestamp: DateTime<Utc>,
        metrics: MetricSet,
    ) -> &HistoryEntry {
        debug!(scope = %scope, "history entry recorded");
        self.entries.push(HistoryEntry {
            timestamp,
            scope,
            metrics,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// One entry per county, sorted by name, then the statewide entry, all
    /// sharing `timestamp`. Returns the number of entries added.
    pub fn record_all(
        &mut self,
        timestamp: DateTime<Utc>,
        records: &[CountyRecord],
        summary: &StatewideSummary,
    ) -> usize {
        let mut sorted: Vec<&CountyRecord> = records.iter().collect();
        sorted.sort_by(|a, b| a.county().cmp(b.county()));
        for r in &sorted {
            self.record(Scope::County(r.county().to_string()), timestamp, MetricSet::from(*r));
        }
        self.record(Scope::Statewide, timestamp, MetricSet::from(summary));
        sorted.len() + 1
    }

    /// Whole log as CSV. The header is written even when the log is empty.
    pub fn export_csv(&self) -> Result<Vec<u8>, ExportError> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        wtr.write_record(HISTORY_HEADER)?;
        for e in &self.entries {
            wtr.serialize(HistoryRow::from(e))?;
        }
        wtr.into_inner().map_err(|e| ExportError::Buffer(e.into_error()))
    }

    /// Serialize in memory, then write to a sibling temp file and rename it
    /// over `path`, so a failed export never leaves a truncated file behind.
    pub fn export_to(&self, path: &Path) -> Result<usize, ExportError> {
        let bytes = self.export_csv()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);
        std::fs::write(&tmp, &bytes).map_err(|source| ExportError::Io {
            path: tmp.clone(),
            source,
        })?;
        if let Err(source) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(ExportError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
        info!(path = %path.display(), rows = self.entries.len(), "history exported");
        Ok(self.entries.len())
    }

    /// Resume a log from a file previously produced by `export_csv`.
    pub fn read_csv<R: Read>(rdr: R) -> Result<Self, LoadError> {
        let mut rdr = csv::Reader::from_reader(rdr);
        let mut entries = Vec::new();
        for result in rdr.deserialize::<HistoryRow>() {
            let row = result?;
            let timestamp = DateTime::parse_from_rfc3339(row.timestamp.trim())
                .map_err(|e| LoadError::InvalidHistory(format!("{:?}: {}", row.timestamp, e)))?
                .with_timezone(&Utc);
            let rag: Rag = row.rag.parse().map_err(LoadError::InvalidHistory)?;
            entries.push(HistoryEntry {
                timestamp,
                scope: Scope::from(row.scope.as_str()),
                metrics: MetricSet {
                    fte_on: row.fte_on,
                    ap: row.ap,
                    capacity: row.capacity,
                    utilization: row.utilization,
                    fte_required: row.fte_required,
                    gap: row.gap,
                    rag,
                },
            });
        }
        debug!(entries = entries.len(), "history resumed from csv");
        Ok(Self { entries })
    }
}
