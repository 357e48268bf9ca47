//! Derived staffing metrics.
//!
//! Everything here is a pure function of its arguments: inputs are borrowed,
//! results are returned as new values, and re-running with different weights
//! always starts again from the raw sheet values.
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::classifier::classify;
use crate::error::{DataValidationError, IssueKind, ValidationIssue};
use crate::types::{
    ArrivalRow, BaselineProductivity, CountyInputs, CountyRecord, DerivedMetrics, Productivity,
};
use crate::weights::WeightsConfig;

fn check_non_negative(county: &str, field: &str, v: f64, out: &mut Vec<ValidationIssue>) {
    if !v.is_finite() {
        out.push(ValidationIssue::for_county(county, field, IssueKind::NotFinite));
    } else if v < 0.0 {
        out.push(ValidationIssue::for_county(county, field, IssueKind::Negative(v)));
    }
}

/// Every constraint violated by one county's raw inputs.
pub fn validate_inputs(inputs: &CountyInputs) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let county = inputs.county.trim();
    if county.is_empty() {
        issues.push(ValidationIssue::for_column("County", IssueKind::BlankCounty));
    }
    check_non_negative(county, "FTE_on", inputs.fte_on, &mut issues);
    if !inputs.p_eff.is_finite() {
        issues.push(ValidationIssue::for_county(county, "P_eff", IssueKind::NotFinite));
    } else if inputs.p_eff <= 0.0 {
        issues.push(ValidationIssue::for_county(
            county,
            "P_eff",
            IssueKind::NotPositive(inputs.p_eff),
        ));
    }
    check_non_negative(county, "AP", inputs.ap, &mut issues);
    check_non_negative(county, "Backlog_Start", inputs.backlog_start, &mut issues);
    issues
}

// Assumes validated inputs.
fn derive(inputs: &CountyInputs, weights: &WeightsConfig) -> DerivedMetrics {
    let capacity = inputs.capacity();
    let utilization = if capacity > 0.0 {
        Some(inputs.ap / capacity)
    } else {
        None
    };
    let fte_required =
        inputs.ap / (inputs.p_eff * weights.productivity_multiplier()) + weights.staffing_buffer_fte();
    DerivedMetrics {
        capacity,
        utilization,
        fte_required,
        gap: fte_required - inputs.fte_on,
        backlog_end: inputs.backlog_start + inputs.ap - capacity,
        rag: classify(utilization),
    }
}

/// Derived metrics for a single county.
pub fn compute(
    inputs: &CountyInputs,
    weights: &WeightsConfig,
) -> Result<DerivedMetrics, DataValidationError> {
    let issues = validate_inputs(inputs);
    if !issues.is_empty() {
        return Err(DataValidationError::new(issues));
    }
    Ok(derive(inputs, weights))
}

/// Recompute every county. If any row is invalid (or a county name repeats)
/// nothing is returned and all problems are reported together.
pub fn recompute_all(
    inputs: &[CountyInputs],
    weights: &WeightsConfig,
) -> Result<Vec<CountyRecord>, DataValidationError> {
    let mut issues = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported_dup: HashSet<&str> = HashSet::new();
    for row in inputs {
        let name = row.county.trim();
        if !name.is_empty() && !seen.insert(name) && reported_dup.insert(name) {
            issues.push(ValidationIssue::for_county(name, "County", IssueKind::DuplicateCounty));
        }
        issues.extend(validate_inputs(row));
    }
    if !issues.is_empty() {
        warn!(count = issues.len(), "recompute aborted on invalid inputs");
        return Err(DataValidationError::new(issues));
    }
    let records: Vec<CountyRecord> = inputs
        .iter()
        .map(|row| CountyRecord {
            inputs: row.clone(),
            metrics: derive(row, weights),
        })
        .collect();
    debug!(counties = records.len(), "recomputed county metrics");
    Ok(records)
}

/// Replace AP with arrival points (`count * weight`, summed per county) for
/// every county that appears in `arrivals`. Other counties keep their AP.
/// Negative counts or weights reject the whole batch.
pub fn apply_arrivals(
    inputs: &[CountyInputs],
    arrivals: &[ArrivalRow],
    weights: &WeightsConfig,
) -> Result<Vec<CountyInputs>, DataValidationError> {
    let mut issues = Vec::new();
    let mut ap_by_county: BTreeMap<&str, f64> = BTreeMap::new();
    for row in arrivals {
        let county = row.county.trim();
        check_non_negative(county, "Count", row.count, &mut issues);
        if let Some(w) = row.weight {
            check_non_negative(county, "Weight", w, &mut issues);
        }
        let w = weights.category_weight(row.category.trim(), row.weight);
        *ap_by_county.entry(county).or_insert(0.0) += row.count * w;
    }
    if !issues.is_empty() {
        warn!(count = issues.len(), "arrivals rejected");
        return Err(DataValidationError::new(issues));
    }
    Ok(inputs
        .iter()
        .map(|row| {
            let mut out = row.clone();
            if let Some(ap) = ap_by_county.get(row.county.trim()) {
                out.ap = *ap;
            }
            out
        })
        .collect())
}

/// Baseline productivity for the single-county calculation.
///
/// `P_ref = completed_points / avg_fte`, `CPF = wbar_current / wbar_baseline`
/// (1 when the baseline weight is zero) and `P_eff = P_ref / CPF` (0 when
/// CPF is zero, which later fails validation).
pub fn effective_productivity(
    baseline: &BaselineProductivity,
) -> Result<Productivity, DataValidationError> {
    let mut issues = Vec::new();
    let fields = [
        ("Completed_points", baseline.completed_points),
        ("Wbar_current", baseline.wbar_current),
        ("Wbar_baseline", baseline.wbar_baseline),
    ];
    for (field, v) in fields {
        if !v.is_finite() {
            issues.push(ValidationIssue::for_column(field, IssueKind::NotFinite));
        } else if v < 0.0 {
            issues.push(ValidationIssue::for_column(field, IssueKind::Negative(v)));
        }
    }
    if !baseline.avg_fte.is_finite() || baseline.avg_fte <= 0.0 {
        issues.push(ValidationIssue::for_column(
            "Avg_FTE",
            IssueKind::NotPositive(baseline.avg_fte),
        ));
    }
    if !issues.is_empty() {
        return Err(DataValidationError::new(issues));
    }
    let p_ref = baseline.completed_points / baseline.avg_fte;
    let cpf = if baseline.wbar_baseline > 0.0 {
        baseline.wbar_current / baseline.wbar_baseline
    } else {
        1.0
    };
    let p_eff = if cpf > 0.0 { p_ref / cpf } else { 0.0 };
    Ok(Productivity { p_ref, cpf, p_eff })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Rag;
    use crate::weights::{WeightsUpdate, PRODUCTIVITY_MULTIPLIER, STAFFING_BUFFER_FTE};

    fn update(pairs: &[(&str, &str)]) -> WeightsUpdate {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn no_buffer() -> WeightsConfig {
        WeightsConfig::new(1.0, 0.0).unwrap()
    }

    #[test]
    fn capacity_and_utilization() {
        let row = CountyInputs::new("Hennepin", 10.0, 120.0, 900.0);
        let m = compute(&row, &no_buffer()).unwrap();
        assert!((m.capacity - 1200.0).abs() < 1e-9);
        assert!((m.utilization.unwrap() - 0.75).abs() < 1e-9);
        assert_eq!(m.rag, Rag::Amber);
        assert!((m.fte_required - 7.5).abs() < 1e-9);
        assert!((m.gap - (-2.5)).abs() < 1e-9);
        assert!((m.backlog_end - (-300.0)).abs() < 1e-9);
    }

    #[test]
    fn weights_adjust_required_fte() {
        let row = CountyInputs::new("Ramsey", 8.0, 100.0, 1000.0);
        let w = WeightsConfig::default()
            .with_update(&update(&[(PRODUCTIVITY_MULTIPLIER, "2"), (STAFFING_BUFFER_FTE, "0.5")]))
            .unwrap();
        let m = compute(&row, &w).unwrap();
        // 1000 / (100 * 2) + 0.5
        assert!((m.fte_required - 5.5).abs() < 1e-9);
        assert!((m.gap - (-2.5)).abs() < 1e-9);
        // utilization ignores the weights
        assert!((m.utilization.unwrap() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn default_buffer_is_added() {
        let row = CountyInputs::new("Cook", 1.0, 100.0, 50.0);
        let m = compute(&row, &WeightsConfig::default()).unwrap();
        assert!((m.fte_required - 0.8).abs() < 1e-9);
    }

    #[test]
    fn zero_ap_is_green_zero_utilization() {
        let row = CountyInputs::new("Lake", 2.0, 50.0, 0.0);
        let m = compute(&row, &no_buffer()).unwrap();
        assert_eq!(m.utilization, Some(0.0));
        assert_eq!(m.rag, Rag::Green);
    }

    #[test]
    fn zero_staff_is_unclassified_not_an_error() {
        let row = CountyInputs::new("Traverse", 0.0, 80.0, 400.0);
        let m = compute(&row, &no_buffer()).unwrap();
        assert_eq!(m.capacity, 0.0);
        assert_eq!(m.utilization, None);
        assert_eq!(m.rag, Rag::Unclassified);
        assert!((m.gap - 5.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_inputs_name_county_and_field() {
        let row = CountyInputs::new("Polk", -1.0, 0.0, -5.0);
        let err = compute(&row, &no_buffer()).unwrap_err();
        let fields: Vec<&str> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["FTE_on", "P_eff", "AP"]);
        assert!(err.issues.iter().all(|i| i.county.as_deref() == Some("Polk")));
    }

    #[test]
    fn compute_does_not_touch_inputs() {
        let row = CountyInputs::new("Clay", 4.0, 90.0, 300.0);
        let before = row.clone();
        let _ = compute(&row, &WeightsConfig::default()).unwrap();
        assert_eq!(row, before);
    }

    #[test]
    fn recompute_is_deterministic() {
        let rows = vec![
            CountyInputs::new("Anoka", 12.0, 110.0, 1000.0),
            CountyInputs::new("Dakota", 15.5, 95.25, 1400.0),
        ];
        let w = WeightsConfig::default();
        let a = recompute_all(&rows, &w).unwrap();
        let b = recompute_all(&rows, &w).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn recompute_reports_all_bad_rows_at_once() {
        let rows = vec![
            CountyInputs::new("Anoka", -2.0, 110.0, 1000.0),
            CountyInputs::new("Benton", 3.0, 110.0, 100.0),
            CountyInputs::new("Carver", 3.0, -1.0, 100.0),
            CountyInputs::new("Benton", 1.0, 10.0, 10.0),
        ];
        let err = recompute_all(&rows, &no_buffer()).unwrap_err();
        assert_eq!(err.issues.len(), 3);
        assert_eq!(err.counties(), vec!["Anoka", "Carver", "Benton"]);
        assert!(err
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::DuplicateCounty));
    }

    #[test]
    fn arrivals_override_ap_with_weight_chain() {
        let rows = vec![
            CountyInputs::new("Aitkin", 2.0, 100.0, 10.0),
            CountyInputs::new("Becker", 2.0, 100.0, 20.0),
        ];
        let arrivals = vec![
            ArrivalRow {
                county: "Aitkin".to_string(),
                category: "Standard Case Work".to_string(),
                count: 100.0,
                weight: Some(1.0),
            },
            ArrivalRow {
                county: " Aitkin ".to_string(),
                category: "Court / Hearing Events".to_string(),
                count: 10.0,
                weight: None,
            },
        ];
        let w = WeightsConfig::default()
            .with_update(&update(&[("Standard Case Work", "0.5")]))
            .unwrap();
        let out = apply_arrivals(&rows, &arrivals, &w).unwrap();
        // 100 * 0.5 (override) + 10 * 1.2 (built-in default)
        assert!((out[0].ap - 62.0).abs() < 1e-9);
        assert_eq!(out[1].ap, 20.0);
        assert_eq!(rows[0].ap, 10.0);
    }

    #[test]
    fn negative_arrivals_cannot_cancel_out() {
        let rows = vec![CountyInputs::new("Cook", 2.0, 100.0, 10.0)];
        let row = |category: &str, count: f64, weight: Option<f64>| ArrivalRow {
            county: "Cook".to_string(),
            category: category.to_string(),
            count,
            weight,
        };
        let arrivals = vec![
            row("Standard Case Work", 100.0, Some(1.0)),
            row("Standard Case Work", -40.0, Some(1.0)),
            row("Court / Hearing Events", 10.0, Some(-1.0)),
        ];
        let err = apply_arrivals(&rows, &arrivals, &WeightsConfig::default()).unwrap_err();
        assert_eq!(
            err.issues,
            vec![
                ValidationIssue::for_county("Cook", "Count", IssueKind::Negative(-40.0)),
                ValidationIssue::for_county("Cook", "Weight", IssueKind::Negative(-1.0)),
            ]
        );
    }

    #[test]
    fn manual_productivity() {
        let p = effective_productivity(&BaselineProductivity {
            completed_points: 10000.0,
            avg_fte: 12.0,
            wbar_current: 1.80,
            wbar_baseline: 1.70,
        })
        .unwrap();
        assert!((p.p_ref - 833.333_333_333).abs() < 1e-6);
        assert!((p.cpf - 1.80 / 1.70).abs() < 1e-12);
        assert!((p.p_eff - p.p_ref / p.cpf).abs() < 1e-9);

        let flat = effective_productivity(&BaselineProductivity {
            completed_points: 100.0,
            avg_fte: 1.0,
            wbar_current: 2.0,
            wbar_baseline: 0.0,
        })
        .unwrap();
        assert_eq!(flat.cpf, 1.0);
        assert_eq!(flat.p_eff, 100.0);

        assert!(effective_productivity(&BaselineProductivity {
            completed_points: 100.0,
            avg_fte: 0.0,
            wbar_current: 1.0,
            wbar_baseline: 1.0,
        })
        .is_err());
    }
}
