//! Choropleth data keyed by county name.
//!
//! Geometry is opaque here: features are matched on their county name
//! property and only gain `metric_value` and `fill_color` properties.
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::types::CountyRecord;

pub const NAME_PROPERTY: &str = "coty_name";
const FILL_ALPHA: u8 = 170;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMetric {
    Utilization,
    Gap,
    FteRequired,
    Ap,
    BacklogEnd,
}

impl MapMetric {
    pub const ALL: [MapMetric; 5] = [
        MapMetric::Utilization,
        MapMetric::Gap,
        MapMetric::FteRequired,
        MapMetric::Ap,
        MapMetric::BacklogEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MapMetric::Utilization => "Utilization",
            MapMetric::Gap => "Gap",
            MapMetric::FteRequired => "FTE_required",
            MapMetric::Ap => "AP",
            MapMetric::BacklogEnd => "Backlog_End",
        }
    }

    /// `None` only for undefined utilization.
    pub fn value(&self, r: &CountyRecord) -> Option<f64> {
        match self {
            MapMetric::Utilization => r.metrics.utilization,
            MapMetric::Gap => Some(r.metrics.gap),
            MapMetric::FteRequired => Some(r.metrics.fte_required),
            MapMetric::Ap => Some(r.inputs.ap),
            MapMetric::BacklogEnd => Some(r.metrics.backlog_end),
        }
    }
}

impl fmt::Display for MapMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MapMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        MapMetric::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown map metric {:?}", s))
    }
}

/// "Aitkin County" and " Aitkin" both key as "Aitkin".
pub fn normalize_county_name(s: &str) -> String {
    let s = s.trim();
    s.strip_suffix(" County").unwrap_or(s).trim().to_string()
}

/// Metric value per normalized county name. Counties with an undefined
/// value are left out and render as zero.
pub fn metric_values(records: &[CountyRecord], metric: MapMetric) -> BTreeMap<String, f64> {
    records
        .iter()
        .filter_map(|r| metric.value(r).map(|v| (normalize_county_name(r.county()), v)))
        .collect()
}

/// Linear light-to-dark ramp between the smallest and largest value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRamp {
    min: f64,
    span: f64,
}

impl ColorRamp {
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
        for v in values {
            min = min.min(v);
            max = max.max(v);
        }
        if !min.is_finite() || !max.is_finite() {
            return Self { min: 0.0, span: 1.0 };
        }
        let span = if max > min { max - min } else { 1.0 };
        Self { min, span }
    }

    pub fn color_for(&self, v: f64) -> [u8; 4] {
        let t = ((v - self.min) / self.span).clamp(0.0, 1.0);
        [
            30 + (180.0 * t) as u8,
            30 + (180.0 * t) as u8,
            60 + (160.0 * t) as u8,
            FILL_ALPHA,
        ]
    }
}

fn feature_name(props: &Value) -> Option<String> {
    match props.get(NAME_PROPERTY)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}

/// Write `metric_value` and `fill_color` into every feature of a GeoJSON
/// FeatureCollection. Returns how many features matched a county.
pub fn annotate_geojson(geojson: &mut Value, values: &BTreeMap<String, f64>) -> usize {
    let Some(features) = geojson.get_mut("features").and_then(Value::as_array_mut) else {
        return 0;
    };

    let total = features.len();
    let mut matched = 0usize;
    let mut assigned = Vec::with_capacity(features.len());
    for ft in features.iter() {
        let v = ft
            .get("properties")
            .and_then(feature_name)
            .and_then(|n| values.get(&normalize_county_name(&n)).copied());
        if v.is_some() {
            matched += 1;
        }
        assigned.push(v.unwrap_or(0.0));
    }

    let ramp = ColorRamp::from_values(assigned.iter().copied());
    for (ft, v) in features.iter_mut().zip(assigned) {
        if !ft.is_object() {
            continue;
        }
        if !ft.get("properties").map(Value::is_object).unwrap_or(false) {
            ft["properties"] = json!({});
        }
        ft["properties"]["metric_value"] = json!(v);
        ft["properties"]["fill_color"] = json!(ramp.color_for(v));
    }
    debug!(features = total, matched, "geojson annotated");
    matched
}
