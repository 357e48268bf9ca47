use calamine::{open_workbook, DataType, Reader, Xlsx};
use csv::ReaderBuilder;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{DataValidationError, IssueKind, LoadError, ValidationIssue};
use crate::types::{ArrivalRow, CountyInputs};
use crate::util::parse_f64_safe;

pub const DEFAULT_SHEET: &str = "Tableau_Export";
pub const ARRIVALS_SHEET: &str = "County_Arrivals";
/// The export sheet carries a title row above its header.
pub const DEFAULT_XLSX_HEADER_ROW: usize = 1;

const COUNTY_COLUMNS: [&str; 4] = ["County", "FTE_on", "P_eff", "AP"];
const ARRIVAL_COLUMNS: [&str; 3] = ["County", "Category", "Count"];

/// A single spreadsheet cell, independent of the file format it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => s.trim().to_string(),
        }
    }

    fn as_number(&self) -> Result<Option<f64>, IssueKind> {
        match self {
            Cell::Empty => Ok(None),
            Cell::Number(n) if n.is_finite() => Ok(Some(*n)),
            Cell::Number(_) => Err(IssueKind::NotFinite),
            Cell::Text(s) if s.trim().is_empty() => Ok(None),
            Cell::Text(s) => parse_f64_safe(Some(s.as_str()))
                .map(Some)
                .ok_or_else(|| IssueKind::NotNumeric(s.clone())),
        }
    }
}

impl From<&DataType> for Cell {
    fn from(d: &DataType) -> Self {
        match d {
            DataType::Empty => Cell::Empty,
            DataType::Int(i) => Cell::Number(*i as f64),
            DataType::Float(f) => Cell::Number(*f),
            DataType::String(s) => Cell::Text(s.clone()),
            DataType::Bool(b) => Cell::Text(b.to_string()),
            other => Cell::Text(format!("{:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Xlsx,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(InputFormat::Csv),
            "xlsx" | "xlsm" => Ok(InputFormat::Xlsx),
            _ => Err(LoadError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub sheet: String,
    /// Rows to skip before the header; `None` uses the format's default.
    pub header_row: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            sheet: DEFAULT_SHEET.to_string(),
            header_row: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub blank_rows: usize,
    pub counties: usize,
    pub arrival_rows: usize,
}

/// Typed contents of one uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub counties: Vec<CountyInputs>,
    pub arrivals: Option<Vec<ArrivalRow>>,
    pub report: LoadReport,
}

impl Dataset {
    pub fn new(counties: Vec<CountyInputs>) -> Self {
        let report = LoadReport {
            total_rows: counties.len(),
            counties: counties.len(),
            ..LoadReport::default()
        };
        Self {
            counties,
            arrivals: None,
            report,
        }
    }

    pub fn with_arrivals(mut self, arrivals: Vec<ArrivalRow>) -> Self {
        self.report.arrival_rows = arrivals.len();
        self.arrivals = Some(arrivals);
        self
    }
}

static EMPTY_CELL: Cell = Cell::Empty;

struct Header {
    index: HashMap<String, usize>,
}

impl Header {
    fn new(row: &[Cell], required: &[&str]) -> Result<Self, DataValidationError> {
        let mut index = HashMap::new();
        for (i, cell) in row.iter().enumerate() {
            let name = cell.as_text();
            if !name.is_empty() {
                index.entry(name).or_insert(i);
            }
        }
        let missing: Vec<ValidationIssue> = required
            .iter()
            .filter(|c| !index.contains_key(**c))
            .map(|c| ValidationIssue::for_column(c, IssueKind::MissingColumn))
            .collect();
        if !missing.is_empty() {
            return Err(DataValidationError::new(missing));
        }
        Ok(Self { index })
    }

    fn cell<'a>(&self, row: &'a [Cell], column: &str) -> &'a Cell {
        self.index
            .get(column)
            .and_then(|i| row.get(*i))
            .unwrap_or(&EMPTY_CELL)
    }
}

fn row_label(line: usize) -> String {
    format!("row {}", line)
}

fn required_number(
    header: &Header,
    row: &[Cell],
    county: &str,
    column: &str,
    issues: &mut Vec<ValidationIssue>,
) -> f64 {
    match header.cell(row, column).as_number() {
        Ok(Some(v)) => v,
        Ok(None) => {
            issues.push(ValidationIssue::for_county(county, column, IssueKind::MissingValue));
            0.0
        }
        Err(kind) => {
            issues.push(ValidationIssue::for_county(county, column, kind));
            0.0
        }
    }
}

fn optional_number(
    header: &Header,
    row: &[Cell],
    county: &str,
    column: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<f64> {
    match header.cell(row, column).as_number() {
        Ok(v) => v,
        Err(kind) => {
            issues.push(ValidationIssue::for_county(county, column, kind));
            None
        }
    }
}

/// Parse the county sheet. `rows[0]` is the header. Every problem in the
/// sheet is collected before returning.
pub fn parse_county_table(
    rows: &[Vec<Cell>],
) -> Result<(Vec<CountyInputs>, LoadReport), DataValidationError> {
    let (header_row, body) = rows
        .split_first()
        .ok_or_else(|| {
            DataValidationError::new(
                COUNTY_COLUMNS
                    .iter()
                    .map(|c| ValidationIssue::for_column(c, IssueKind::MissingColumn))
                    .collect(),
            )
        })?;
    let header = Header::new(header_row, &COUNTY_COLUMNS)?;

    let mut issues = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut counties = Vec::new();
    let mut report = LoadReport {
        total_rows: body.len(),
        ..LoadReport::default()
    };

    for (i, row) in body.iter().enumerate() {
        if row.iter().all(Cell::is_blank) {
            report.blank_rows += 1;
            continue;
        }
        // +2: one for the header, one for 1-based numbering.
        let line = i + 2;
        let mut county = header.cell(row, "County").as_text();
        if county.is_empty() {
            issues.push(ValidationIssue::for_county(
                &row_label(line),
                "County",
                IssueKind::BlankCounty,
            ));
            county = row_label(line);
        } else if !seen.insert(county.clone()) {
            issues.push(ValidationIssue::for_county(
                &county,
                "County",
                IssueKind::DuplicateCounty,
            ));
        }
        let fte_on = required_number(&header, row, &county, "FTE_on", &mut issues);
        let p_eff = required_number(&header, row, &county, "P_eff", &mut issues);
        let ap = required_number(&header, row, &county, "AP", &mut issues);
        let backlog_start =
            optional_number(&header, row, &county, "Backlog_Start", &mut issues).unwrap_or(0.0);
        let cpf = optional_number(&header, row, &county, "CPF", &mut issues);
        let p_ref = optional_number(&header, row, &county, "P_ref", &mut issues);
        counties.push(CountyInputs {
            county,
            fte_on,
            p_eff,
            ap,
            backlog_start,
            cpf,
            p_ref,
        });
    }

    if !issues.is_empty() {
        return Err(DataValidationError::new(issues));
    }
    report.counties = counties.len();
    Ok((counties, report))
}

/// Parse the per-category arrivals sheet. Empty counts are zero; an empty
/// weight defers to the session or built-in weights.
pub fn parse_arrivals_table(rows: &[Vec<Cell>]) -> Result<Vec<ArrivalRow>, DataValidationError> {
    let Some((header_row, body)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let header = Header::new(header_row, &ARRIVAL_COLUMNS)?;
    let mut issues = Vec::new();
    let mut out = Vec::new();
    for (i, row) in body.iter().enumerate() {
        if row.iter().all(Cell::is_blank) {
            continue;
        }
        let county = header.cell(row, "County").as_text();
        let label = if county.is_empty() {
            row_label(i + 2)
        } else {
            county.clone()
        };
        let count = optional_number(&header, row, &label, "Count", &mut issues).unwrap_or(0.0);
        let weight = optional_number(&header, row, &label, "Weight", &mut issues);
        if count < 0.0 {
            issues.push(ValidationIssue::for_county(&label, "Count", IssueKind::Negative(count)));
        }
        if let Some(w) = weight.filter(|w| *w < 0.0) {
            issues.push(ValidationIssue::for_county(&label, "Weight", IssueKind::Negative(w)));
        }
        if county.is_empty() {
            issues.push(ValidationIssue::for_county(&label, "County", IssueKind::BlankCounty));
        }
        out.push(ArrivalRow {
            county,
            category: header.cell(row, "Category").as_text(),
            count,
            weight,
        });
    }
    if !issues.is_empty() {
        return Err(DataValidationError::new(issues));
    }
    Ok(out)
}

fn read_csv_cells(path: &Path) -> Result<Vec<Vec<Cell>>, LoadError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(
            record
                .iter()
                .map(|f| {
                    if f.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(f.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(rows)
}

fn excel_error(path: &Path, source: calamine::XlsxError) -> LoadError {
    LoadError::Excel {
        path: path.to_path_buf(),
        source,
    }
}

/// Cells of `sheet` plus the worksheet row index of the first one. A range
/// starts at the first used cell, so leading empty rows are not included.
fn read_sheet_cells(
    workbook: &mut Xlsx<std::io::BufReader<std::fs::File>>,
    path: &Path,
    sheet: &str,
) -> Result<(Vec<Vec<Cell>>, usize), LoadError> {
    let range = workbook
        .worksheet_range(sheet)
        .ok_or_else(|| LoadError::MissingSheet(sheet.to_string()))?
        .map_err(|e| excel_error(path, e))?;
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let rows: Vec<Vec<Cell>> = range
        .rows()
        .map(|r| r.iter().map(Cell::from).collect())
        .collect();
    Ok((rows, first_row))
}

fn skip_to_header(rows: Vec<Vec<Cell>>, header_row: usize) -> Result<Vec<Vec<Cell>>, LoadError> {
    if rows.len() <= header_row {
        return Err(LoadError::EmptySheet);
    }
    Ok(rows.into_iter().skip(header_row).collect())
}

/// Load a CSV or XLSX file into a typed dataset.
pub fn load_dataset(path: &Path, opts: &LoadOptions) -> Result<Dataset, LoadError> {
    let format = InputFormat::from_path(path)?;
    debug!(path = %path.display(), ?format, sheet = %opts.sheet, "loading dataset");
    let dataset = match format {
        InputFormat::Csv => {
            if !path.exists() {
                return Err(LoadError::Io {
                    path: PathBuf::from(path),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                });
            }
            let rows = skip_to_header(read_csv_cells(path)?, opts.header_row.unwrap_or(0))?;
            let (counties, report) = parse_county_table(&rows)?;
            Dataset {
                counties,
                arrivals: None,
                report,
            }
        }
        InputFormat::Xlsx => {
            let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| excel_error(path, e))?;
            let (rows, first_row) = read_sheet_cells(&mut workbook, path, &opts.sheet)?;
            // `header_row` counts worksheet rows, including empty ones above the range.
            let header_row = opts
                .header_row
                .unwrap_or(DEFAULT_XLSX_HEADER_ROW)
                .saturating_sub(first_row);
            let rows = skip_to_header(rows, header_row)?;
            let (counties, report) = parse_county_table(&rows)?;
            let has_arrivals = workbook.sheet_names().iter().any(|s| s == ARRIVALS_SHEET);
            let arrivals = if has_arrivals {
                let (rows, _) = read_sheet_cells(&mut workbook, path, ARRIVALS_SHEET)?;
                Some(parse_arrivals_table(&rows)?)
            } else {
                None
            };
            let mut dataset = Dataset {
                counties,
                arrivals: None,
                report,
            };
            if let Some(a) = arrivals {
                dataset = dataset.with_arrivals(a);
            }
            dataset
        }
    };
    info!(
        counties = dataset.report.counties,
        blank_rows = dataset.report.blank_rows,
        arrival_rows = dataset.report.arrival_rows,
        "dataset loaded"
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        if s.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s.to_string())
        }
    }

    fn table(rows: &[&[&str]]) -> Vec<Vec<Cell>> {
        rows.iter().map(|r| r.iter().map(|c| text(c)).collect()).collect()
    }

    #[test]
    fn parses_typed_rows_and_ignores_extra_columns() {
        let rows = table(&[
            &[" County ", "FTE_on", "P_eff", "AP", "Utilization", "Backlog_Start"],
            &["Aitkin", "3", "1,200.5", "2400", "9.99", "15"],
            &["", "", "", "", "", ""],
            &["Anoka", "12.5", "9.8e2", "1.1E4", "", ""],
        ]);
        let (counties, report) = parse_county_table(&rows).unwrap();
        assert_eq!(counties.len(), 2);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.blank_rows, 1);
        assert_eq!(counties[0].p_eff, 1200.5);
        assert_eq!(counties[0].backlog_start, 15.0);
        assert_eq!(counties[1].backlog_start, 0.0);
        assert_eq!(counties[1].p_eff, 980.0);
        assert_eq!(counties[1].ap, 11000.0);
    }

    #[test]
    fn optional_productivity_columns_pass_through() {
        let rows = table(&[
            &["County", "FTE_on", "P_eff", "AP", "CPF", "P_ref"],
            &["Aitkin", "3", "1000", "2400", "1.05", "1050"],
            &["Cook", "2", "800", "1000", "", ""],
        ]);
        let (counties, _) = parse_county_table(&rows).unwrap();
        assert_eq!(counties[0].cpf, Some(1.05));
        assert_eq!(counties[0].p_ref, Some(1050.0));
        assert_eq!(counties[1].cpf, None);

        let bad = table(&[&["County", "FTE_on", "P_eff", "AP", "CPF"], &["Cook", "1", "1", "1", "high"]]);
        let err = parse_county_table(&bad).unwrap_err();
        assert_eq!(err.issues[0].field, "CPF");
    }

    #[test]
    fn numeric_cells_pass_through() {
        let rows = vec![
            table(&[&["County", "FTE_on", "P_eff", "AP"]]).remove(0),
            vec![
                Cell::Text("Cook".into()),
                Cell::Number(1.0),
                Cell::Number(50.0),
                Cell::Number(20.0),
            ],
        ];
        let (counties, _) = parse_county_table(&rows).unwrap();
        assert_eq!(counties[0], CountyInputs::new("Cook", 1.0, 50.0, 20.0));
    }

    #[test]
    fn missing_columns_are_reported_together() {
        let rows = table(&[&["County", "FTE", "AP"], &["Cook", "1", "2"]]);
        let err = parse_county_table(&rows).unwrap_err();
        let missing: Vec<&str> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(missing, vec!["FTE_on", "P_eff"]);
        assert!(err.issues.iter().all(|i| i.kind == IssueKind::MissingColumn));
    }

    #[test]
    fn bad_cells_and_duplicates_are_collected() {
        let rows = table(&[
            &["County", "FTE_on", "P_eff", "AP"],
            &["Cook", "n/a", "50", "20"],
            &["Lake", "2", "", "20"],
            &["Cook", "1", "50", "20"],
            &["", "1", "50", "20"],
        ]);
        let err = parse_county_table(&rows).unwrap_err();
        assert_eq!(err.issues.len(), 4);
        assert_eq!(
            err.issues[0],
            ValidationIssue::for_county("Cook", "FTE_on", IssueKind::NotNumeric("n/a".into()))
        );
        assert_eq!(
            err.issues[1],
            ValidationIssue::for_county("Lake", "P_eff", IssueKind::MissingValue)
        );
        assert_eq!(err.issues[2].kind, IssueKind::DuplicateCounty);
        assert_eq!(
            err.issues[3],
            ValidationIssue::for_county("row 5", "County", IssueKind::BlankCounty)
        );
    }

    #[test]
    fn empty_sheet_is_missing_every_column() {
        let err = parse_county_table(&[]).unwrap_err();
        assert_eq!(err.issues.len(), 4);
    }

    #[test]
    fn arrivals_table() {
        let rows = table(&[
            &["County", "Category", "Count", "Weight"],
            &["Cook", "Standard Case Work", "10", "1"],
            &["Cook", "Court / Hearing Events", "", ""],
        ]);
        let arrivals = parse_arrivals_table(&rows).unwrap();
        assert_eq!(arrivals.len(), 2);
        assert_eq!(arrivals[0].weight, Some(1.0));
        assert_eq!(arrivals[1].count, 0.0);
        assert_eq!(arrivals[1].weight, None);

        let negative = table(&[
            &["County", "Category", "Count", "Weight"],
            &["Cook", "Standard Case Work", "100", "1"],
            &["Cook", "Standard Case Work", "-40", "1"],
            &["Lake", "Court / Hearing Events", "5", "-1.2"],
        ]);
        let err = parse_arrivals_table(&negative).unwrap_err();
        assert_eq!(
            err.issues,
            vec![
                ValidationIssue::for_county("Cook", "Count", IssueKind::Negative(-40.0)),
                ValidationIssue::for_county("Lake", "Weight", IssueKind::Negative(-1.2)),
            ]
        );

        let bad = table(&[&["County", "Count"], &["Cook", "1"]]);
        let err = parse_arrivals_table(&bad).unwrap_err();
        assert_eq!(err.issues[0].field, "Category");
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(InputFormat::from_path(Path::new("a.CSV")).unwrap(), InputFormat::Csv);
        assert_eq!(InputFormat::from_path(Path::new("a.xlsx")).unwrap(), InputFormat::Xlsx);
        assert!(matches!(
            InputFormat::from_path(Path::new("a.ods")),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }
}
