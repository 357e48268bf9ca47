//! Weighting coefficients used by the metric calculator.
//!
//! A `WeightsConfig` is only ever replaced as a whole: updates are parsed and
//! validated into a fresh value, and nothing is applied if any key fails.
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::error::{ConfigValidationError, KeyIssue, WeightIssue};

pub const PRODUCTIVITY_MULTIPLIER: &str = "productivity_multiplier";
pub const STAFFING_BUFFER_FTE: &str = "staffing_buffer_fte";

pub const DEFAULT_PRODUCTIVITY_MULTIPLIER: f64 = 1.0;
pub const DEFAULT_STAFFING_BUFFER_FTE: f64 = 0.30;

/// Arrival weights per case category, used when neither the session nor the
/// arrivals sheet supplies one.
pub static DEFAULT_CATEGORY_WEIGHTS: Lazy<BTreeMap<&'static str, f64>> = Lazy::new(|| {
    BTreeMap::from([
        ("Standard Case Work", 1.0),
        ("Full Locate / Long Locate", 2.0),
        ("METS / Interstate Complexity", 1.5),
        ("Enforcement / R&M Actions", 1.3),
        ("Customer Contacts - Telephone", 0.2),
        ("Customer Contacts - In Person", 0.5),
        ("Court / Hearing Events", 1.2),
        ("Financial Adjustments / Reconciliations", 0.6),
    ])
});

/// Key -> raw text as typed by the user.
pub type WeightsUpdate = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsConfig {
    productivity_multiplier: f64,
    staffing_buffer_fte: f64,
    #[serde(default)]
    category_weights: BTreeMap<String, f64>,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            productivity_multiplier: DEFAULT_PRODUCTIVITY_MULTIPLIER,
            staffing_buffer_fte: DEFAULT_STAFFING_BUFFER_FTE,
            category_weights: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WeightsFileError {
    #[error("failed to access weights file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed weights file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigValidationError),
}

fn check_value(key: &str, value: f64) -> Option<WeightIssue> {
    if !value.is_finite() {
        return Some(WeightIssue::NotFinite);
    }
    match key {
        PRODUCTIVITY_MULTIPLIER if value <= 0.0 => Some(WeightIssue::NotPositive(value)),
        _ if value < 0.0 => Some(WeightIssue::Negative(value)),
        _ => None,
    }
}

fn parse_value(raw: &str) -> Result<f64, WeightIssue> {
    let v = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| WeightIssue::NotNumeric(raw.to_string()))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(WeightIssue::NotFinite)
    }
}

impl WeightsConfig {
    pub fn new(
        productivity_multiplier: f64,
        staffing_buffer_fte: f64,
    ) -> Result<Self, ConfigValidationError> {
        let cfg = Self {
            productivity_multiplier,
            staffing_buffer_fte,
            category_weights: BTreeMap::new(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn productivity_multiplier(&self) -> f64 {
        self.productivity_multiplier
    }

    pub fn staffing_buffer_fte(&self) -> f64 {
        self.staffing_buffer_fte
    }

    pub fn category_weights(&self) -> &BTreeMap<String, f64> {
        &self.category_weights
    }

    /// Weight applied to one arrivals row: session override, then the sheet's
    /// own weight, then the built-in default, then zero.
    pub fn category_weight(&self, category: &str, sheet_weight: Option<f64>) -> f64 {
        self.category_weights
            .get(category)
            .copied()
            .or(sheet_weight)
            .or_else(|| DEFAULT_CATEGORY_WEIGHTS.get(category).copied())
            .unwrap_or(0.0)
    }

    /// All editable keys with their current values, coefficients first.
    pub fn entries(&self) -> Vec<(String, f64)> {
        let mut out = vec![
            (PRODUCTIVITY_MULTIPLIER.to_string(), self.productivity_multiplier),
            (STAFFING_BUFFER_FTE.to_string(), self.staffing_buffer_fte),
        ];
        out.extend(self.category_weights.iter().map(|(k, v)| (k.clone(), *v)));
        out
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let issues: Vec<KeyIssue> = self
            .entries()
            .into_iter()
            .filter_map(|(key, value)| {
                if key.trim().is_empty() {
                    return Some(KeyIssue { key, issue: WeightIssue::BlankKey });
                }
                check_value(&key, value).map(|issue| KeyIssue { key, issue })
            })
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError { issues })
        }
    }

    /// Build the configuration that results from `update`. Keys must be one
    /// of the two coefficients or a known category: built-in, or already
    /// overridden.
    pub fn with_update(&self, update: &WeightsUpdate) -> Result<Self, ConfigValidationError> {
        self.with_update_for::<&str>(update, &[])
    }

    /// Like `with_update`, also accepting the categories in `categories`
    /// (typically those of a loaded arrivals sheet).
    pub fn with_update_for<S: AsRef<str>>(
        &self,
        update: &WeightsUpdate,
        categories: &[S],
    ) -> Result<Self, ConfigValidationError> {
        let mut next = self.clone();
        let mut issues = Vec::new();
        for (key, raw) in update {
            let key = key.trim();
            if key.is_empty() {
                issues.push(KeyIssue { key: key.to_string(), issue: WeightIssue::BlankKey });
                continue;
            }
            if !self.is_known_key(key, categories) {
                issues.push(KeyIssue { key: key.to_string(), issue: WeightIssue::UnknownKey });
                continue;
            }
            let value = match parse_value(raw) {
                Ok(v) => v,
                Err(issue) => {
                    issues.push(KeyIssue { key: key.to_string(), issue });
                    continue;
                }
            };
            if let Some(issue) = check_value(key, value) {
                issues.push(KeyIssue { key: key.to_string(), issue });
                continue;
            }
            match key {
                PRODUCTIVITY_MULTIPLIER => next.productivity_multiplier = value,
                STAFFING_BUFFER_FTE => next.staffing_buffer_fte = value,
                category => {
                    next.category_weights.insert(category.to_string(), value);
                }
            }
        }
        if !issues.is_empty() {
            return Err(ConfigValidationError { issues });
        }
        debug!(keys = update.len(), "weights update validated");
        Ok(next)
    }

    fn is_known_key<S: AsRef<str>>(&self, key: &str, categories: &[S]) -> bool {
        key == PRODUCTIVITY_MULTIPLIER
            || key == STAFFING_BUFFER_FTE
            || DEFAULT_CATEGORY_WEIGHTS.contains_key(key)
            || self.category_weights.contains_key(key)
            || categories.iter().any(|c| c.as_ref().trim() == key)
    }

    pub fn from_json_str(s: &str) -> Result<Self, WeightsFileError> {
        let cfg: WeightsConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, WeightsFileError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }

    pub fn save(&self, path: &Path) -> Result<(), WeightsFileError> {
        let s = serde_json::to_string_pretty(self)?;
        std::fs::write(path, s)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(pairs: &[(&str, &str)]) -> WeightsUpdate {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let w = WeightsConfig::default();
        assert_eq!(w.productivity_multiplier(), 1.0);
        assert_eq!(w.staffing_buffer_fte(), 0.30);
        assert!(w.category_weights().is_empty());
    }

    #[test]
    fn valid_update_replaces_values() {
        let w = WeightsConfig::default()
            .with_update(&update(&[
                (PRODUCTIVITY_MULTIPLIER, " 1.25 "),
                (STAFFING_BUFFER_FTE, "0"),
                ("Standard Case Work", "1.1"),
            ]))
            .unwrap();
        assert_eq!(w.productivity_multiplier(), 1.25);
        assert_eq!(w.staffing_buffer_fte(), 0.0);
        assert_eq!(w.category_weights().get("Standard Case Work"), Some(&1.1));
    }

    #[test]
    fn partially_invalid_update_is_rejected_whole() {
        let original = WeightsConfig::default();
        let err = original
            .with_update(&update(&[
                (PRODUCTIVITY_MULTIPLIER, "2.0"),
                (STAFFING_BUFFER_FTE, "lots"),
                ("Court / Hearing Events", "NaN"),
            ]))
            .unwrap_err();
        assert_eq!(err.keys(), vec!["Court / Hearing Events", STAFFING_BUFFER_FTE]);
        assert_eq!(err.issues[0].issue, WeightIssue::NotFinite);
        assert_eq!(
            err.issues[1].issue,
            WeightIssue::NotNumeric("lots".to_string())
        );
        assert_eq!(original, WeightsConfig::default());
    }

    #[test]
    fn multiplier_must_be_positive() {
        let err = WeightsConfig::default()
            .with_update(&update(&[(PRODUCTIVITY_MULTIPLIER, "0")]))
            .unwrap_err();
        assert_eq!(err.issues[0].issue, WeightIssue::NotPositive(0.0));
        assert!(WeightsConfig::new(1.0, -0.1).is_err());
        assert!(WeightsConfig::new(f64::INFINITY, 0.3).is_err());
    }

    #[test]
    fn category_weight_fallback_chain() {
        let w = WeightsConfig::default()
            .with_update(&update(&[("Court / Hearing Events", "3.0")]))
            .unwrap();
        assert_eq!(w.category_weight("Court / Hearing Events", Some(1.2)), 3.0);
        assert_eq!(w.category_weight("Standard Case Work", Some(0.9)), 0.9);
        assert_eq!(w.category_weight("Standard Case Work", None), 1.0);
        assert_eq!(w.category_weight("Unheard Of", None), 0.0);
    }

    #[test]
    fn json_roundtrip_and_validation() {
        let w = WeightsConfig::default()
            .with_update(&update(&[("Standard Case Work", "1.5")]))
            .unwrap();
        let s = serde_json::to_string(&w).unwrap();
        assert_eq!(WeightsConfig::from_json_str(&s).unwrap(), w);

        let bad = r#"{"productivity_multiplier": -1.0, "staffing_buffer_fte": 0.3}"#;
        assert!(matches!(
            WeightsConfig::from_json_str(bad),
            Err(WeightsFileError::Invalid(_))
        ));
        assert!(matches!(
            WeightsConfig::from_json_str("{"),
            Err(WeightsFileError::Json(_))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected_by_name() {
        let err = WeightsConfig::default()
            .with_update(&update(&[
                ("staffing_bufer_fte", "5"),
                (STAFFING_BUFFER_FTE, "1"),
                ("Appeals", "2"),
            ]))
            .unwrap_err();
        assert_eq!(err.keys(), vec!["Appeals", "staffing_bufer_fte"]);
        assert!(err.issues.iter().all(|i| i.issue == WeightIssue::UnknownKey));
        assert!(err.to_string().contains("staffing_bufer_fte: not a coefficient"));
    }

    #[test]
    fn sheet_categories_become_editable() {
        let sheet = vec!["Appeals".to_string()];
        let w = WeightsConfig::default()
            .with_update_for(&update(&[("Appeals", "2")]), &sheet)
            .unwrap();
        assert_eq!(w.category_weights().get("Appeals"), Some(&2.0));
        // an existing override stays editable without the sheet
        let w = w.with_update(&update(&[("Appeals", "2.5")])).unwrap();
        assert_eq!(w.category_weight("Appeals", None), 2.5);
    }
}
