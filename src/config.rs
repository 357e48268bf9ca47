use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::loader::{LoadOptions, DEFAULT_SHEET};

/// County staffing calculator: load county metrics, edit weights, roll up
/// statewide figures and keep a history of snapshots.
#[derive(Parser, Debug, Clone, Default)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) CSV or XLSX workbook with the county sheet.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (default Tableau_Export) Worksheet holding the county table.
    #[clap(long, value_parser)]
    pub sheet: Option<String>,

    /// Rows to skip above the header (default 1 for XLSX, 0 for CSV).
    #[clap(long, value_parser)]
    pub header_row: Option<usize>,

    /// (file path) JSON weights file applied at start-up.
    #[clap(short, long, value_parser)]
    pub weights: Option<String>,

    /// (directory, default .) Where exports are written.
    #[clap(short, long, value_parser)]
    pub out_dir: Option<String>,

    /// (file path) County boundaries GeoJSON used for map output.
    #[clap(long, value_parser)]
    pub geojson: Option<String>,

    /// (file path) Previously exported history CSV to resume from.
    #[clap(long, value_parser)]
    pub history: Option<String>,

    /// Turn on debug logging.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub input: Option<PathBuf>,
    pub sheet: String,
    pub header_row: Option<usize>,
    pub weights: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub geojson: Option<PathBuf>,
    pub history: Option<PathBuf>,
    pub verbose: bool,
}

pub const HISTORY_FILE: &str = "acasm_history.csv";
pub const COUNTY_METRICS_FILE: &str = "acasm_county_metrics.csv";
pub const MAP_FILE: &str = "acasm_county_map.geojson";
pub const WEIGHTS_FILE: &str = "acasm_weights.json";

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl AppConfig {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            sheet: self.sheet.clone(),
            header_row: self.header_row,
        }
    }

    /// Path typed at the load prompt, falling back to the configured input
    /// when the line is blank.
    pub fn input_or(&self, typed: &str) -> Option<PathBuf> {
        let typed = typed.trim();
        if typed.is_empty() {
            self.input.clone()
        } else {
            Some(PathBuf::from(typed))
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.out_dir.join(HISTORY_FILE)
    }

    pub fn county_metrics_path(&self) -> PathBuf {
        self.out_dir.join(COUNTY_METRICS_FILE)
    }

    pub fn map_path(&self) -> PathBuf {
        self.out_dir.join(MAP_FILE)
    }

    pub fn weights_save_path(&self) -> PathBuf {
        self.weights
            .clone()
            .unwrap_or_else(|| self.out_dir.join(WEIGHTS_FILE))
    }
}

pub fn load_config(args: &Args) -> Result<AppConfig> {
    load_config_with_env(args, &SystemEnvironment)
}

/// Command line values win over `ACASM_*` environment variables, which win
/// over built-in defaults.
pub fn load_config_with_env<E: EnvironmentProvider>(args: &Args, env: &E) -> Result<AppConfig> {
    let pick = |arg: &Option<String>, var: &str| non_empty(arg.clone()).or_else(|| non_empty(env.get_var(var)));

    let header_row = match args.header_row {
        Some(n) => Some(n),
        None => match non_empty(env.get_var("ACASM_HEADER_ROW")) {
            Some(v) => Some(v.parse::<usize>().context("Invalid ACASM_HEADER_ROW")?),
            None => None,
        },
    };

    Ok(AppConfig {
        input: pick(&args.input, "ACASM_INPUT").map(PathBuf::from),
        sheet: pick(&args.sheet, "ACASM_SHEET").unwrap_or_else(|| DEFAULT_SHEET.to_string()),
        header_row,
        weights: pick(&args.weights, "ACASM_WEIGHTS").map(PathBuf::from),
        out_dir: pick(&args.out_dir, "ACASM_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        geojson: pick(&args.geojson, "ACASM_GEOJSON").map(PathBuf::from),
        history: pick(&args.history, "ACASM_HISTORY").map(PathBuf::from),
        verbose: args.verbose,
    })
}
