// Public modules
pub mod aggregator;
pub mod calculator;
pub mod classifier;
pub mod config;
pub mod error;
pub mod history;
pub mod loader;
pub mod map;
pub mod output;
pub mod session;
pub mod types;
pub mod util;
pub mod weights;

// Re-export commonly used items
pub use aggregator::{rollup, STATEWIDE_SCOPE};
pub use calculator::{apply_arrivals, compute, effective_productivity, recompute_all, validate_inputs};
pub use classifier::{classify, Rag, AMBER_THRESHOLD, RED_THRESHOLD};
pub use error::{
    ConfigValidationError, DataValidationError, ExportError, IssueKind, LoadError, SessionError,
    ValidationIssue,
};
pub use history::{HistoryEntry, HistoryLog, MetricSet, Scope};
pub use loader::{load_dataset, Dataset, LoadOptions};
pub use session::Session;
pub use types::*;
pub use weights::{WeightsConfig, WeightsUpdate};
