//! Per-user working state.
//!
//! A `Session` owns the loaded dataset, the active weights, the last
//! successfully derived records and the history log. Every mutating call
//! either commits completely or leaves the session as it was.
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

use crate::aggregator::rollup;
use crate::calculator::{apply_arrivals, recompute_all};
use crate::error::{DataValidationError, ExportError, SessionError};
use crate::history::{HistoryEntry, HistoryLog, MetricSet, Scope};
use crate::loader::Dataset;
use crate::types::{CountyInputs, CountyRecord, StatewideSummary};
use crate::weights::{WeightsConfig, WeightsUpdate};

#[derive(Debug, Default)]
pub struct Session {
    dataset: Option<Dataset>,
    weights: WeightsConfig,
    records: Vec<CountyRecord>,
    history: HistoryLog,
}

fn derive_records(
    dataset: &Dataset,
    weights: &WeightsConfig,
) -> Result<Vec<CountyRecord>, DataValidationError> {
    match &dataset.arrivals {
        Some(arrivals) if !arrivals.is_empty() => {
            let inputs: Vec<CountyInputs> = apply_arrivals(&dataset.counties, arrivals, weights)?;
            recompute_all(&inputs, weights)
        }
        _ => recompute_all(&dataset.counties, weights),
    }
}

impl Session {
    pub fn new(weights: WeightsConfig) -> Self {
        Self {
            weights,
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: HistoryLog) -> Self {
        self.history = history;
        self
    }

    pub fn weights(&self) -> &WeightsConfig {
        &self.weights
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub fn records(&self) -> &[CountyRecord] {
        &self.records
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn has_data(&self) -> bool {
        self.dataset.is_some()
    }

    /// Replace the dataset. On a validation failure the previous dataset and
    /// records stay in place.
    pub fn load(&mut self, dataset: Dataset) -> Result<&[CountyRecord], SessionError> {
        let records = derive_records(&dataset, &self.weights)?;
        info!(counties = records.len(), "dataset accepted");
        self.dataset = Some(dataset);
        self.records = records;
        Ok(&self.records)
    }

    /// Validate `update`, recompute with it, and only then adopt both the new
    /// weights and the new records. Categories from the loaded arrivals sheet
    /// are valid keys alongside the built-in ones.
    pub fn update_weights(&mut self, update: &WeightsUpdate) -> Result<(), SessionError> {
        let next = self.weights.with_update_for(update, &self.categories())?;
        self.replace_weights(next)
    }

    /// Adopt an already-validated configuration, e.g. one loaded from disk.
    pub fn replace_weights(&mut self, next: WeightsConfig) -> Result<(), SessionError> {
        next.validate()?;
        if let Some(dataset) = &self.dataset {
            let records = derive_records(dataset, &next).map_err(|e| {
                warn!("weights update rejected by recompute: {}", e);
                e
            })?;
            self.records = records;
        }
        self.weights = next;
        Ok(())
    }

    pub fn recompute(&mut self) -> Result<&[CountyRecord], SessionError> {
        let dataset = self.dataset.as_ref().ok_or(SessionError::NoData)?;
        self.records = derive_records(dataset, &self.weights)?;
        Ok(&self.records)
    }

    /// County names in sorted order.
    pub fn counties(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self.records.iter().map(|r| r.county()).collect();
        names.into_iter().collect()
    }

    pub fn county(&self, name: &str) -> Option<&CountyRecord> {
        let name = name.trim();
        self.records.iter().find(|r| r.county() == name)
    }

    pub fn statewide(&self) -> StatewideSummary {
        rollup(&self.records)
    }

    /// Every category known to the session: sheet categories plus overrides.
    pub fn categories(&self) -> Vec<String> {
        let mut cats: BTreeSet<String> = self.weights.category_weights().keys().cloned().collect();
        if let Some(arrivals) = self.dataset.as_ref().and_then(|d| d.arrivals.as_ref()) {
            cats.extend(arrivals.iter().map(|a| a.category.clone()));
        }
        cats.into_iter().collect()
    }

    pub fn append_county(
        &mut self,
        name: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<&HistoryEntry, SessionError> {
        let record = self
            .county(name)
            .ok_or_else(|| SessionError::UnknownCounty(name.trim().to_string()))?;
        let metrics = MetricSet::from(record);
        let scope = Scope::County(record.county().to_string());
        Ok(self.history.record(scope, timestamp, metrics))
    }

    pub fn append_statewide(
        &mut self,
        timestamp: DateTime<Utc>,
    ) -> Result<&HistoryEntry, SessionError> {
        if !self.has_data() {
            return Err(SessionError::NoData);
        }
        let summary = self.statewide();
        Ok(self
            .history
            .record(Scope::Statewide, timestamp, MetricSet::from(&summary)))
    }

    /// All counties plus the statewide rollup, stamped with one timestamp.
    pub fn append_all(&mut self, timestamp: DateTime<Utc>) -> Result<usize, SessionError> {
        if !self.has_data() {
            return Err(SessionError::NoData);
        }
        let summary = self.statewide();
        let added = self.history.record_all(timestamp, &self.records, &summary);
        info!(added, total = self.history.len(), "snapshot appended");
        Ok(added)
    }

    pub fn export_history(&self, path: &Path) -> Result<usize, ExportError> {
        self.history.export_to(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Rag;
    use crate::types::ArrivalRow;
    use crate::weights::{PRODUCTIVITY_MULTIPLIER, STAFFING_BUFFER_FTE};
    use chrono::TimeZone;

    fn dataset() -> Dataset {
        Dataset::new(vec![
            CountyInputs::new("Ramsey", 10.0, 100.0, 900.0),
            CountyInputs::new("Anoka", 5.0, 100.0, 300.0),
        ])
    }

    fn update(pairs: &[(&str, &str)]) -> WeightsUpdate {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 31, 17, 0, 0).unwrap()
    }

    #[test]
    fn load_derives_records() {
        let mut s = Session::default();
        s.load(dataset()).unwrap();
        assert_eq!(s.counties(), vec!["Anoka", "Ramsey"]);
        assert_eq!(s.county("Ramsey").unwrap().metrics.rag, Rag::Red);
        assert!((s.statewide().utilization.unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn invalid_load_keeps_previous_state() {
        let mut s = Session::default();
        s.load(dataset()).unwrap();
        let before = s.records().to_vec();
        let bad = Dataset::new(vec![CountyInputs::new("Cook", 1.0, 0.0, 1.0)]);
        assert!(matches!(s.load(bad), Err(SessionError::Data(_))));
        assert_eq!(s.records(), before.as_slice());
        assert_eq!(s.dataset().unwrap().counties.len(), 2);
    }

    #[test]
    fn weights_update_recomputes() {
        let mut s = Session::default();
        s.load(dataset()).unwrap();
        s.update_weights(&update(&[(STAFFING_BUFFER_FTE, "1"), (PRODUCTIVITY_MULTIPLIER, "1")]))
            .unwrap();
        let r = s.county("Anoka").unwrap();
        assert!((r.metrics.fte_required - 4.0).abs() < 1e-9);
        assert_eq!(s.weights().staffing_buffer_fte(), 1.0);
    }

    #[test]
    fn invalid_weights_leave_metrics_unchanged() {
        let mut s = Session::default();
        s.load(dataset()).unwrap();
        let before = s.records().to_vec();
        let weights_before = s.weights().clone();
        let err = s
            .update_weights(&update(&[(STAFFING_BUFFER_FTE, "2"), (PRODUCTIVITY_MULTIPLIER, "abc")]))
            .unwrap_err();
        match err {
            SessionError::Config(e) => assert_eq!(e.keys(), vec![PRODUCTIVITY_MULTIPLIER]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(s.records(), before.as_slice());
        assert_eq!(s.weights(), &weights_before);
    }

    #[test]
    fn misspelled_weight_key_is_rejected() {
        let mut s = Session::default();
        s.load(dataset()).unwrap();
        let before = s.records().to_vec();
        match s.update_weights(&update(&[("staffing_bufer_fte", "5")])) {
            Err(SessionError::Config(e)) => assert_eq!(e.keys(), vec!["staffing_bufer_fte"]),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(s.records(), before.as_slice());
        assert_eq!(s.weights(), &WeightsConfig::default());
    }

    #[test]
    fn arrivals_feed_ap_and_follow_weight_edits() {
        let mut s = Session::default();
        let ds = dataset().with_arrivals(vec![ArrivalRow {
            county: "Anoka".into(),
            category: "Standard Case Work".into(),
            count: 200.0,
            weight: Some(1.0),
        }]);
        s.load(ds).unwrap();
        assert_eq!(s.county("Anoka").unwrap().inputs.ap, 200.0);
        assert_eq!(s.county("Ramsey").unwrap().inputs.ap, 900.0);

        s.update_weights(&update(&[("Standard Case Work", "2.5")])).unwrap();
        assert_eq!(s.county("Anoka").unwrap().inputs.ap, 500.0);
        // raw sheet value is untouched
        assert_eq!(s.dataset().unwrap().counties[1].ap, 300.0);
        assert_eq!(s.categories(), vec!["Standard Case Work".to_string()]);
    }

    #[test]
    fn negative_arrivals_reject_the_load() {
        let mut s = Session::default();
        s.load(dataset()).unwrap();
        let arrivals = [("Standard Case Work", 100.0), ("Standard Case Work", -40.0)]
            .iter()
            .map(|(category, count)| ArrivalRow {
                county: "Anoka".into(),
                category: category.to_string(),
                count: *count,
                weight: Some(1.0),
            })
            .collect();
        let bad = dataset().with_arrivals(arrivals);
        assert!(matches!(s.load(bad), Err(SessionError::Data(_))));
        assert_eq!(s.county("Anoka").unwrap().inputs.ap, 300.0);
        assert!(s.dataset().unwrap().arrivals.is_none());
    }

    #[test]
    fn snapshots_append_in_order() {
        let mut s = Session::default();
        assert!(matches!(s.append_all(ts()), Err(SessionError::NoData)));
        s.load(dataset()).unwrap();
        assert_eq!(s.append_all(ts()).unwrap(), 3);
        s.append_county("Ramsey", ts()).unwrap();
        s.append_statewide(ts()).unwrap();
        assert!(matches!(
            s.append_county("Nowhere", ts()),
            Err(SessionError::UnknownCounty(_))
        ));
        let scopes: Vec<String> = s
            .history()
            .entries()
            .iter()
            .map(|e| e.scope.to_string())
            .collect();
        assert_eq!(scopes, vec!["Anoka", "Ramsey", "Statewide", "Ramsey", "Statewide"]);
    }

    #[test]
    fn recompute_without_data() {
        let mut s = Session::default();
        assert!(matches!(s.recompute(), Err(SessionError::NoData)));
    }
}
