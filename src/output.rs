use serde::Serialize;
use std::error::Error;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

use crate::history::HistoryEntry;
use crate::types::{CountyMetricsRow, CountyRecord, CountyTableRow, HistoryTableRow};
use crate::util::{format_number, format_ratio};

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), Box<dyn Error>> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn Error>> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

/// Per-county table with raw inputs and derived metrics, sorted by county.
pub fn county_metrics_rows(records: &[CountyRecord]) -> Vec<CountyMetricsRow> {
    let mut rows: Vec<CountyMetricsRow> = records.iter().map(CountyMetricsRow::from).collect();
    rows.sort_by(|a, b| a.county.cmp(&b.county));
    rows
}

pub fn county_table_rows(records: &[CountyRecord]) -> Vec<CountyTableRow> {
    let mut sorted: Vec<&CountyRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.county().cmp(b.county()));
    sorted
        .into_iter()
        .map(|r| CountyTableRow {
            county: r.inputs.county.clone(),
            fte_on: format_number(r.inputs.fte_on, 2),
            p_eff: format_number(r.inputs.p_eff, 2),
            ap: format_number(r.inputs.ap, 2),
            capacity: format_number(r.metrics.capacity, 2),
            utilization: format_ratio(r.metrics.utilization),
            fte_required: format_number(r.metrics.fte_required, 2),
            gap: format_number(r.metrics.gap, 2),
            rag: r.metrics.rag.to_string(),
        })
        .collect()
}

pub fn history_table_rows(entries: &[HistoryEntry]) -> Vec<HistoryTableRow> {
    entries
        .iter()
        .map(|e| HistoryTableRow {
            timestamp: e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            scope: e.scope.to_string(),
            ap: format_number(e.metrics.ap, 2),
            utilization: format_ratio(e.metrics.utilization),
            gap: format_number(e.metrics.gap, 2),
            rag: e.metrics.rag.to_string(),
        })
        .collect()
}

pub fn render_table<T>(rows: &[T], max_rows: usize) -> Option<String>
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        return None;
    }
    Some(Table::new(slice).with(Style::markdown()).to_string())
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    match render_table(rows, max_rows) {
        Some(table_str) => println!("{}\n", table_str),
        None => println!("(no rows)\n"),
    }
}
