// Entry point and interactive terminal flow.
//
// The binary stands in for the dashboard: each menu option maps onto one
// operation of the library `Session`, which the loop owns and passes down
// explicitly.
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use acasm_report::config::{load_config, AppConfig, Args};
use acasm_report::map::{annotate_geojson, metric_values, MapMetric};
use acasm_report::output::{
    county_metrics_rows, county_table_rows, history_table_rows, preview_table_rows, write_csv,
    write_json,
};
use acasm_report::types::{BaselineProductivity, CountyInputs, WeightTableRow};
use acasm_report::util::{format_int, format_number, format_ratio};
use acasm_report::weights::{WeightsUpdate, DEFAULT_CATEGORY_WEIGHTS, STAFFING_BUFFER_FTE};
use acasm_report::{
    compute, effective_productivity, load_dataset, HistoryLog, Session, WeightsConfig,
};

/// Print `prompt` and read one trimmed line.
fn read_line(prompt: &str) -> String {
    print!("{}", prompt);
    let _ = io::stdout().flush();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).ok();
    buf.trim().to_string()
}

fn read_choice() -> String {
    read_line("Enter choice: ")
}

/// Keep asking until the user types a number; an empty line takes `default`.
fn read_number(label: &str, default: f64) -> f64 {
    loop {
        let raw = read_line(&format!("{} [{}]: ", label, default));
        if raw.is_empty() {
            return default;
        }
        match raw.replace(',', "").parse::<f64>() {
            Ok(v) if v.is_finite() => return v,
            _ => println!("Invalid number. Please try again."),
        }
    }
}

fn handle_load(session: &mut Session, cfg: &AppConfig) {
    let prompt = match &cfg.input {
        Some(p) => format!("Path to workbook (.xlsx or .csv) [{}]: ", p.display()),
        None => "Path to workbook (.xlsx or .csv): ".to_string(),
    };
    let Some(path) = cfg.input_or(&read_line(&prompt)) else {
        println!("No file given.\n");
        return;
    };
    load_into(session, cfg, &path);
}

fn load_into(session: &mut Session, cfg: &AppConfig, path: &Path) {
    let dataset = match load_dataset(path, &cfg.load_options()) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to load file: {}\n", e);
            return;
        }
    };
    let report = dataset.report.clone();
    match session.load(dataset) {
        Ok(records) => {
            println!(
                "Processing dataset... ({} counties loaded, {} blank rows dropped)",
                format_int(records.len()),
                format_int(report.blank_rows)
            );
            if report.arrival_rows > 0 {
                println!(
                    "Info: AP recomputed from {} arrivals rows.",
                    format_int(report.arrival_rows)
                );
            }
            println!();
        }
        Err(e) => eprintln!("Dataset rejected, previous data kept: {}\n", e),
    }
}

fn handle_view_county(session: &Session) {
    if !session.has_data() {
        println!("Error: No data loaded. Please load a workbook first (option 1).\n");
        return;
    }
    println!("Counties: {}", session.counties().join(", "));
    let name = read_line("County: ");
    let Some(r) = session.county(&name) else {
        println!("Unknown county {:?}.\n", name);
        return;
    };
    println!("\nCounty: {}", r.county());
    println!("  Arrival Points (AP): {}", format_number(r.inputs.ap, 2));
    println!("  P_eff:               {}", format_number(r.inputs.p_eff, 2));
    if let Some(p_ref) = r.inputs.p_ref {
        println!("  P_ref:               {}", format_number(p_ref, 2));
    }
    if let Some(cpf) = r.inputs.cpf {
        println!("  CPF:                 {}", format_number(cpf, 3));
    }
    println!("  FTE On:              {}", format_number(r.inputs.fte_on, 2));
    println!("  Capacity:            {}", format_number(r.metrics.capacity, 2));
    println!("  Utilization:         {}", format_ratio(r.metrics.utilization));
    println!("  RAG:                 {}", r.metrics.rag);
    println!("  FTE Required:        {}", format_number(r.metrics.fte_required, 2));
    println!("  Gap:                 {}", format_number(r.metrics.gap, 2));
    println!("  Backlog Start:       {}", format_number(r.inputs.backlog_start, 2));
    println!("  Backlog End:         {}\n", format_number(r.metrics.backlog_end, 2));
}

fn handle_statewide(session: &Session) {
    if !session.has_data() {
        println!("Error: No data loaded. Please load a workbook first (option 1).\n");
        return;
    }
    let s = session.statewide();
    println!("\nStatewide rollup ({} counties)", format_int(s.county_count));
    println!("  AP_state:             {}", format_number(s.ap, 2));
    println!("  Effective Capacity:   {}", format_number(s.capacity, 2));
    println!("  Util_state:           {}", format_ratio(s.utilization));
    println!("  RAG:                  {}", s.rag);
    println!("  FTE Required (state): {}", format_number(s.fte_required, 2));
    println!("  Gap (state):          {}", format_number(s.gap, 2));
    println!("  Backlog Start:        {}", format_number(s.backlog_start, 2));
    println!("  Backlog End:          {}", format_number(s.backlog_end, 2));
    println!(
        "  Counties by band:     RED {} / AMBER {} / GREEN {} / UNCLASSIFIED {}\n",
        s.rag_counts.red, s.rag_counts.amber, s.rag_counts.green, s.rag_counts.unclassified
    );
    preview_table_rows(&county_table_rows(session.records()), 10);
}

fn print_weights(session: &Session) {
    let mut rows: Vec<WeightTableRow> = session
        .weights()
        .entries()
        .into_iter()
        .map(|(key, value)| WeightTableRow {
            key,
            value: format_number(value, 3),
        })
        .collect();
    for cat in session.categories() {
        if !rows.iter().any(|r| r.key == cat) {
            rows.push(WeightTableRow {
                key: cat,
                value: "(sheet)".to_string(),
            });
        }
    }
    for (cat, value) in DEFAULT_CATEGORY_WEIGHTS.iter() {
        if !rows.iter().any(|r| r.key == *cat) {
            rows.push(WeightTableRow {
                key: cat.to_string(),
                value: format!("{} (built-in)", format_number(*value, 3)),
            });
        }
    }
    preview_table_rows(&rows, rows.len());
}

fn handle_edit_weights(session: &mut Session) {
    print_weights(session);
    println!("Enter key=value lines; an empty line applies the update.");
    let mut update = WeightsUpdate::new();
    loop {
        let line = read_line("> ");
        if line.is_empty() {
            break;
        }
        match line.split_once('=') {
            Some((k, v)) => {
                update.insert(k.trim().to_string(), v.trim().to_string());
            }
            None => println!("Expected key=value."),
        }
    }
    if update.is_empty() {
        println!("No changes.\n");
        return;
    }
    match session.update_weights(&update) {
        Ok(()) => println!("Weights applied; metrics recomputed.\n"),
        Err(e) => eprintln!("Weights not applied: {}\n", e),
    }
}

fn handle_save_weights(session: &Session, cfg: &AppConfig) {
    let path = cfg.weights_save_path();
    match session.weights().save(&path) {
        Ok(()) => println!("Weights saved to {}\n", path.display()),
        Err(e) => eprintln!("Write error: {}\n", e),
    }
}

fn handle_append(session: &mut Session) {
    match session.append_all(Utc::now()) {
        Ok(n) => println!(
            "Appended {} entries (all counties + state). History now has {} entries.\n",
            format_int(n),
            format_int(session.history().len())
        ),
        Err(e) => eprintln!("Cannot append snapshot: {}\n", e),
    }
    let entries = session.history().entries();
    let start = entries.len().saturating_sub(5);
    preview_table_rows(&history_table_rows(&entries[start..]), 5);
}

fn handle_export_history(session: &Session, cfg: &AppConfig) {
    let path = cfg.history_path();
    match session.export_history(&path) {
        Ok(n) => println!("(History with {} rows exported to {})\n", format_int(n), path.display()),
        Err(e) => eprintln!("Export failed, history kept in memory; please retry: {}\n", e),
    }
}

fn handle_export_counties(session: &Session, cfg: &AppConfig) {
    if !session.has_data() {
        println!("Error: No data loaded. Please load a workbook first (option 1).\n");
        return;
    }
    let path = cfg.county_metrics_path();
    if let Err(e) = write_csv(&path, &county_metrics_rows(session.records())) {
        eprintln!("Write error: {}", e);
        return;
    }
    println!("(Full table exported to {})\n", path.display());
}

fn handle_map(session: &Session, cfg: &AppConfig) {
    if !session.has_data() {
        println!("Error: No data loaded. Please load a workbook first (option 1).\n");
        return;
    }
    let geojson_path = match &cfg.geojson {
        Some(p) => p.clone(),
        None => PathBuf::from(read_line("Path to county GeoJSON: ")),
    };
    let names: Vec<&str> = MapMetric::ALL.iter().map(|m| m.as_str()).collect();
    let raw = read_line(&format!("Map metric ({}) [Utilization]: ", names.join(", ")));
    let metric = if raw.is_empty() {
        MapMetric::Utilization
    } else {
        match raw.parse::<MapMetric>() {
            Ok(m) => m,
            Err(e) => {
                println!("{}\n", e);
                return;
            }
        }
    };
    let mut geojson: serde_json::Value = match std::fs::read_to_string(&geojson_path)
        .map_err(anyhow::Error::from)
        .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
    {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Failed to read {}: {}\n", geojson_path.display(), e);
            return;
        }
    };
    let values = metric_values(session.records(), metric);
    let matched = annotate_geojson(&mut geojson, &values);
    if matched < values.len() {
        warn!(matched, counties = values.len(), "some counties have no map feature");
    }
    let out = cfg.map_path();
    match write_json(&out, &geojson) {
        Ok(()) => println!(
            "Map data for {} written to {} ({} counties matched)\n",
            metric,
            out.display(),
            format_int(matched)
        ),
        Err(e) => eprintln!("Write error: {}\n", e),
    }
}

fn handle_manual(session: &Session) {
    println!("Manual Mode (single county)");
    let fte_on = read_number("FTE on staff", 10.0);
    let buffer = read_number("Buffer (FTE)", session.weights().staffing_buffer_fte());
    let backlog_start = read_number("Backlog start", 0.0);
    let baseline = BaselineProductivity {
        completed_points: read_number("Completed points (baseline period)", 10000.0),
        avg_fte: read_number("Average FTE (baseline period)", 12.0),
        wbar_current: read_number("Average case weight (current)", 1.80),
        wbar_baseline: read_number("Average case weight (baseline)", 1.70),
    };
    let ap = read_number("Arrival Points (AP)", 8000.0);

    let productivity = match effective_productivity(&baseline) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}\n", e);
            return;
        }
    };
    let mut update = WeightsUpdate::new();
    update.insert(STAFFING_BUFFER_FTE.to_string(), buffer.to_string());
    let weights = match session.weights().with_update(&update) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("{}\n", e);
            return;
        }
    };
    let inputs =
        CountyInputs::new("Manual", fte_on, productivity.p_eff, ap).with_backlog_start(backlog_start);
    match compute(&inputs, &weights) {
        Ok(m) => {
            println!("\n  P_ref:        {}", format_number(productivity.p_ref, 2));
            println!("  CPF:          {}", format_number(productivity.cpf, 3));
            println!("  P_eff:        {}", format_number(productivity.p_eff, 2));
            println!("  Capacity_eff: {}", format_number(m.capacity, 2));
            println!("  Utilization:  {}", format_ratio(m.utilization));
            println!("  RAG:          {}", m.rag);
            println!("  Backlog End:  {}", format_number(m.backlog_end, 2));
            println!("  FTE Required: {}", format_number(m.fte_required, 2));
            println!("  Gap:          {}\n", format_number(m.gap, 2));
        }
        Err(e) => eprintln!("{}\n", e),
    }
}

fn build_session(cfg: &AppConfig) -> Result<Session> {
    let weights = match &cfg.weights {
        Some(p) if p.exists() => WeightsConfig::load(p)
            .with_context(|| format!("Invalid weights file {}", p.display()))?,
        _ => WeightsConfig::default(),
    };
    let mut session = Session::new(weights);
    if let Some(p) = &cfg.history {
        let file = std::fs::File::open(p)
            .with_context(|| format!("Failed to open history {}", p.display()))?;
        let history = HistoryLog::read_csv(file)
            .with_context(|| format!("Invalid history file {}", p.display()))?;
        info!(entries = history.len(), "history resumed");
        session = session.with_history(history);
    }
    Ok(session)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let cfg = load_config(&args)?;
    info!(input = ?cfg.input, out_dir = %cfg.out_dir.display(), "starting");

    let mut session = build_session(&cfg)?;
    if let Some(p) = cfg.input.clone() {
        load_into(&mut session, &cfg, &p);
    }

    loop {
        println!("ACASM County + State Calculator:");
        println!("[1] Load the workbook");
        println!("[2] View county");
        println!("[3] Statewide rollup");
        println!("[4] Edit weights");
        println!("[5] Save weights");
        println!("[6] Append snapshot (all counties + state)");
        println!("[7] Export history CSV");
        println!("[8] Export county metrics CSV");
        println!("[9] Build county map");
        println!("[10] Manual calculation (single county)");
        println!("[0] Exit\n");
        match read_choice().as_str() {
            "1" => handle_load(&mut session, &cfg),
            "2" => handle_view_county(&session),
            "3" => handle_statewide(&session),
            "4" => handle_edit_weights(&mut session),
            "5" => handle_save_weights(&session, &cfg),
            "6" => handle_append(&mut session),
            "7" => handle_export_history(&session, &cfg),
            "8" => handle_export_counties(&session, &cfg),
            "9" => handle_map(&session, &cfg),
            "10" => handle_manual(&session),
            "0" => {
                println!("Exiting the program.");
                break;
            }
            _ => println!("Invalid choice. Please enter a number from the menu.\n"),
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}
