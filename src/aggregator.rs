//! Statewide rollup.
//!
//! Ratios are taken over summed inputs, never averaged across counties.
use crate::classifier::classify;
use crate::types::{CountyRecord, RagCounts, StatewideSummary};

pub const STATEWIDE_SCOPE: &str = "Statewide";

pub fn rollup(records: &[CountyRecord]) -> StatewideSummary {
    let mut fte_on = 0.0;
    let mut ap = 0.0;
    let mut capacity = 0.0;
    let mut fte_required = 0.0;
    let mut gap = 0.0;
    let mut backlog_start = 0.0;
    let mut backlog_end = 0.0;
    let mut rag_counts = RagCounts::default();

    for r in records {
        fte_on += r.inputs.fte_on;
        ap += r.inputs.ap;
        // From raw inputs, not r.metrics.capacity.
        capacity += r.inputs.fte_on * r.inputs.p_eff;
        fte_required += r.metrics.fte_required;
        gap += r.metrics.gap;
        backlog_start += r.inputs.backlog_start;
        backlog_end += r.metrics.backlog_end;
        rag_counts.add(r.metrics.rag);
    }

    let utilization = if capacity > 0.0 {
        Some(ap / capacity)
    } else {
        None
    };

    StatewideSummary {
        county_count: records.len(),
        fte_on,
        ap,
        capacity,
        utilization,
        fte_required,
        gap,
        backlog_start,
        backlog_end,
        rag: classify(utilization),
        rag_counts,
    }
}
