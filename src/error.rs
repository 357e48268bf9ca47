// Error taxonomy shared by the loader, calculator, weights and history log.
//
// Validation errors carry every problem found in a batch instead of stopping
// at the first one, so a user can fix a whole sheet in one pass.
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// What is wrong with a single input value.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    Negative(f64),
    NotPositive(f64),
    NotFinite,
    NotNumeric(String),
    MissingValue,
    MissingColumn,
    DuplicateCounty,
    BlankCounty,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::Negative(v) => write!(f, "must be >= 0, got {}", v),
            IssueKind::NotPositive(v) => write!(f, "must be > 0, got {}", v),
            IssueKind::NotFinite => write!(f, "must be a finite number"),
            IssueKind::NotNumeric(raw) => write!(f, "not a number: {:?}", raw),
            IssueKind::MissingValue => write!(f, "value is missing"),
            IssueKind::MissingColumn => write!(f, "required column is missing"),
            IssueKind::DuplicateCounty => write!(f, "county appears more than once"),
            IssueKind::BlankCounty => write!(f, "county name is blank"),
        }
    }
}

/// One offending field, optionally tied to a county.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub county: Option<String>,
    pub field: String,
    pub kind: IssueKind,
}

impl ValidationIssue {
    pub fn for_county(county: &str, field: &str, kind: IssueKind) -> Self {
        Self {
            county: Some(county.to_string()),
            field: field.to_string(),
            kind,
        }
    }

    pub fn for_column(field: &str, kind: IssueKind) -> Self {
        Self {
            county: None,
            field: field.to_string(),
            kind,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.county {
            Some(c) => write!(f, "{} / {}: {}", c, self.field, self.kind),
            None => write!(f, "{}: {}", self.field, self.kind),
        }
    }
}

fn join_issues<T: fmt::Display>(issues: &[T]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Raw county data violates a constraint.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} invalid value(s): {}", .issues.len(), join_issues(.issues))]
pub struct DataValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl DataValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// Counties named in the issues, in first-seen order.
    pub fn counties(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for issue in &self.issues {
            if let Some(c) = issue.county.as_deref() {
                if !seen.contains(&c) {
                    seen.push(c);
                }
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeightIssue {
    NotNumeric(String),
    NotFinite,
    Negative(f64),
    NotPositive(f64),
    BlankKey,
    UnknownKey,
}

impl fmt::Display for WeightIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightIssue::NotNumeric(raw) => write!(f, "not a number: {:?}", raw),
            WeightIssue::NotFinite => write!(f, "must be a finite number"),
            WeightIssue::Negative(v) => write!(f, "must be >= 0, got {}", v),
            WeightIssue::NotPositive(v) => write!(f, "must be > 0, got {}", v),
            WeightIssue::BlankKey => write!(f, "weight name is blank"),
            WeightIssue::UnknownKey => write!(f, "not a coefficient or known category"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyIssue {
    pub key: String,
    pub issue: WeightIssue,
}

impl fmt::Display for KeyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.issue)
    }
}

/// A weights update was rejected; nothing from it was applied.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("weights rejected: {}", join_issues(.issues))]
pub struct ConfigValidationError {
    pub issues: Vec<KeyIssue>,
}

impl ConfigValidationError {
    pub fn keys(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.key.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize history: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush history buffer: {0}")]
    Buffer(#[source] std::io::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to open workbook {path}: {source}")]
    Excel {
        path: PathBuf,
        #[source]
        source: calamine::XlsxError,
    },
    #[error("worksheet {0:?} not found")]
    MissingSheet(String),
    #[error("sheet has no header row")]
    EmptySheet,
    #[error("invalid history row: {0}")]
    InvalidHistory(String),
    #[error("unsupported input type: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Validation(#[from] DataValidationError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigValidationError),
    #[error(transparent)]
    Data(#[from] DataValidationError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("unknown county: {0}")]
    UnknownCounty(String),
    #[error("no dataset loaded")]
    NoData,
}
