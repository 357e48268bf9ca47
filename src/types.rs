use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::classifier::Rag;

/// Raw per-county inputs as read from the sheet. Never mutated by a recompute.
#[derive(Debug, Clone, PartialEq)]
pub struct CountyInputs {
    pub county: String,
    pub fte_on: f64,
    pub p_eff: f64,
    pub ap: f64,
    pub backlog_start: f64,
    /// Informational sheet columns, shown but never used in calculations.
    pub cpf: Option<f64>,
    pub p_ref: Option<f64>,
}

impl CountyInputs {
    pub fn new(county: &str, fte_on: f64, p_eff: f64, ap: f64) -> Self {
        Self {
            county: county.to_string(),
            fte_on,
            p_eff,
            ap,
            backlog_start: 0.0,
            cpf: None,
            p_ref: None,
        }
    }

    pub fn with_backlog_start(mut self, backlog_start: f64) -> Self {
        self.backlog_start = backlog_start;
        self
    }

    /// Effective production capacity, `FTE_on * P_eff`.
    pub fn capacity(&self) -> f64 {
        self.fte_on * self.p_eff
    }
}

/// Fields derived from a `CountyInputs` and a weights configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetrics {
    pub capacity: f64,
    /// `None` when capacity is zero.
    pub utilization: Option<f64>,
    pub fte_required: f64,
    pub gap: f64,
    pub backlog_end: f64,
    pub rag: Rag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountyRecord {
    pub inputs: CountyInputs,
    pub metrics: DerivedMetrics,
}

impl CountyRecord {
    pub fn county(&self) -> &str {
        &self.inputs.county
    }
}

/// One row of the per-category arrivals table.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalRow {
    pub county: String,
    pub category: String,
    pub count: f64,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RagCounts {
    pub red: usize,
    pub amber: usize,
    pub green: usize,
    pub unclassified: usize,
}

impl RagCounts {
    pub fn add(&mut self, rag: Rag) {
        match rag {
            Rag::Red => self.red += 1,
            Rag::Amber => self.amber += 1,
            Rag::Green => self.green += 1,
            Rag::Unclassified => self.unclassified += 1,
        }
    }
}

/// Rollup of every county into one synthetic record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatewideSummary {
    pub county_count: usize,
    pub fte_on: f64,
    pub ap: f64,
    pub capacity: f64,
    pub utilization: Option<f64>,
    pub fte_required: f64,
    pub gap: f64,
    pub backlog_start: f64,
    pub backlog_end: f64,
    pub rag: Rag,
    pub rag_counts: RagCounts,
}

/// Baseline figures for the single-county manual calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineProductivity {
    pub completed_points: f64,
    pub avg_fte: f64,
    pub wbar_current: f64,
    pub wbar_baseline: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Productivity {
    pub p_ref: f64,
    pub cpf: f64,
    pub p_eff: f64,
}

/// CSV shape of the county metrics export.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CountyMetricsRow {
    #[serde(rename = "County")]
    pub county: String,
    #[serde(rename = "FTE_on")]
    pub fte_on: f64,
    #[serde(rename = "P_eff")]
    pub p_eff: f64,
    #[serde(rename = "AP")]
    pub ap: f64,
    #[serde(rename = "Backlog_Start")]
    pub backlog_start: f64,
    #[serde(rename = "Capacity")]
    pub capacity: f64,
    #[serde(rename = "Utilization")]
    pub utilization: Option<f64>,
    #[serde(rename = "FTE_required")]
    pub fte_required: f64,
    #[serde(rename = "Gap")]
    pub gap: f64,
    #[serde(rename = "Backlog_End")]
    pub backlog_end: f64,
    #[serde(rename = "RAG")]
    pub rag: String,
}

impl From<&CountyRecord> for CountyMetricsRow {
    fn from(r: &CountyRecord) -> Self {
        Self {
            county: r.inputs.county.clone(),
            fte_on: r.inputs.fte_on,
            p_eff: r.inputs.p_eff,
            ap: r.inputs.ap,
            backlog_start: r.inputs.backlog_start,
            capacity: r.metrics.capacity,
            utilization: r.metrics.utilization,
            fte_required: r.metrics.fte_required,
            gap: r.metrics.gap,
            backlog_end: r.metrics.backlog_end,
            rag: r.metrics.rag.as_str().to_string(),
        }
    }
}

/// Formatted row for terminal previews.
#[derive(Debug, Tabled, Clone)]
pub struct CountyTableRow {
    #[tabled(rename = "County")]
    pub county: String,
    #[tabled(rename = "FTE_on")]
    pub fte_on: String,
    #[tabled(rename = "P_eff")]
    pub p_eff: String,
    #[tabled(rename = "AP")]
    pub ap: String,
    #[tabled(rename = "Capacity")]
    pub capacity: String,
    #[tabled(rename = "Utilization")]
    pub utilization: String,
    #[tabled(rename = "FTE_required")]
    pub fte_required: String,
    #[tabled(rename = "Gap")]
    pub gap: String,
    #[tabled(rename = "RAG")]
    pub rag: String,
}

#[derive(Debug, Tabled, Clone)]
pub struct HistoryTableRow {
    #[tabled(rename = "Timestamp")]
    pub timestamp: String,
    #[tabled(rename = "Scope")]
    pub scope: String,
    #[tabled(rename = "AP")]
    pub ap: String,
    #[tabled(rename = "Utilization")]
    pub utilization: String,
    #[tabled(rename = "Gap")]
    pub gap: String,
    #[tabled(rename = "RAG")]
    pub rag: String,
}

#[derive(Debug, Tabled, Clone)]
pub struct WeightTableRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
}
