// Shared primitives for decoding donor files: every input, Excel or CSV,
// is flattened into a plain grid of strings before any source-specific
// interpretation happens.

use calamine::{open_workbook, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::debug;
use snafu::prelude::*;

use crate::etl::*;

/// A file as read from disk: rows of cells, no interpretation applied.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

/// Reads a donor file into a raw grid. The decoding library is picked from
/// the file extension; everything downstream only sees strings.
pub fn read_raw_file(path: &str) -> BEtlResult<RawTable> {
    let lower = path.to_lowercase();
    if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
        read_excel(path)
    } else if lower.ends_with(".csv") {
        read_csv(path)
    } else {
        Err(Box::new(EtlError::UnsupportedExtension {
            path: path.to_string(),
        }))
    }
}

fn read_excel(path: &str) -> BEtlResult<RawTable> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).context(OpeningWorkbookSnafu { path })?;
    let wrange = workbook
        .worksheet_range_at(0)
        .context(EmptyWorkbookSnafu { path })?
        .context(OpeningWorkbookSnafu { path })?;
    let rows: Vec<Vec<String>> = wrange
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();
    debug!("read_excel: {:?}: {} rows", path, rows.len());
    Ok(RawTable { rows })
}

fn read_csv(path: &str) -> BEtlResult<RawTable> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;
    let mut rows: Vec<Vec<String>> = Vec::new();
    for line_r in rdr.into_records() {
        let line = line_r.context(CsvLineParseSnafu { path })?;
        rows.push(line.iter().map(|c| c.to_string()).collect());
    }
    debug!("read_csv: {:?}: {} rows", path, rows.len());
    Ok(RawTable { rows })
}

fn cell_to_string(cell: &calamine::DataType) -> String {
    match cell {
        calamine::DataType::String(s) => s.trim().to_string(),
        calamine::DataType::Float(f) => format_float(*f),
        calamine::DataType::Int(i) => i.to_string(),
        calamine::DataType::Bool(b) => b.to_string(),
        calamine::DataType::DateTime(serial) => excel_serial_to_string(*serial),
        calamine::DataType::Empty => String::new(),
        _ => String::new(),
    }
}

// Check numbers and grant ids come through as floats; "4012.0" must not
// leak into the output.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

// Excel serial dates count days from 1899-12-30.
fn excel_serial_to_string(serial: f64) -> String {
    let base = match NaiveDate::from_ymd_opt(1899, 12, 30).and_then(|d| d.and_hms_opt(0, 0, 0)) {
        Some(b) => b,
        None => return String::new(),
    };
    let seconds = (serial * 86400.0).round() as i64;
    let stamp: NaiveDateTime = base + Duration::seconds(seconds);
    if seconds % 86400 == 0 {
        stamp.format("%m/%d/%Y").to_string()
    } else {
        stamp.format("%m/%d/%Y %H:%M:%S").to_string()
    }
}

/// Brings the many gift-date shapes the sources use (ISO timestamps,
/// US dates with and without a time, spelled-out dates) to a single
/// representation for the import file. Unparseable values pass through
/// unchanged.
pub fn normalize_gift_date(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%SZ",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(raw, fmt) {
            return stamp.format("%m/%d/%Y").to_string();
        }
    }
    for fmt in ["%m/%d/%Y", "%Y-%m-%d", "%B %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.format("%m/%d/%Y").to_string();
        }
    }
    debug!("normalize_gift_date: leaving {:?} as is", raw);
    raw.to_string()
}

/// Parses a ledger-style date cell ("12/24/2021"). Used to recognize the
/// deposit rows of positional ledgers.
pub fn parse_ledger_date(cell: &str) -> Option<String> {
    NaiveDate::parse_from_str(cell.trim(), "%m/%d/%Y")
        .ok()
        .map(|d| d.format("%m/%d/%Y").to_string())
}

/// One source's donation rows under that source's native column names,
/// filtered down to the rows worth importing. Row indexes are the merge
/// keys used by the id-resolution and finalize passes.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct SourceTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SourceTable {
    pub fn new(columns: Vec<String>) -> SourceTable {
        SourceTable {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from a label row and data rows. Rows are padded (or
    /// truncated) to the label count and rows with no content at all are
    /// dropped.
    pub fn from_label_and_rows(labels: &[String], data_rows: &[Vec<String>]) -> SourceTable {
        let mut table = SourceTable::new(labels.iter().map(|l| l.trim().to_string()).collect());
        for row in data_rows {
            if row.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            table.push_row(row.clone());
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn col(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Some sources spell the same column two ways depending on which
    /// screen produced the export; this returns whichever is present.
    pub fn col2(&self, name1: &str, name2: &str) -> Option<usize> {
        self.col(name1).or_else(|| self.col(name2))
    }

    pub fn cell_at(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn cell(&self, row: usize, name: &str) -> &str {
        match self.col(name) {
            Some(col) => self.cell_at(row, col),
            None => "",
        }
    }

    pub fn set_cell_at(&mut self, row: usize, col: usize, value: impl Into<String>) {
        if let Some(slot) = self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            *slot = value.into();
        }
    }

    pub fn set_cell(&mut self, row: usize, name: &str, value: impl Into<String>) {
        match self.col(name) {
            Some(col) => self.set_cell_at(row, col, value),
            None => debug!("set_cell: no column named {:?}", name),
        }
    }

    /// Adds a column filled with empty strings. No-op if the column already
    /// exists.
    pub fn add_column(&mut self, name: &str) {
        if self.col(name).is_some() {
            return;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
    }

    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(row: &[&str]) -> Vec<String> {
        row.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn from_label_and_rows_pads_and_drops_blank_rows() {
        let labels = strings(&["A", "B", "C"]);
        let data = vec![
            strings(&["1", "2"]),
            strings(&["", "", ""]),
            strings(&["4", "5", "6", "7"]),
        ];
        let table = SourceTable::from_label_and_rows(&labels, &data);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, "C"), "");
        assert_eq!(table.cell(1, "C"), "6");
    }

    #[test]
    fn add_column_backfills_existing_rows() {
        let labels = strings(&["A"]);
        let data = vec![strings(&["1"])];
        let mut table = SourceTable::from_label_and_rows(&labels, &data);
        table.add_column("B");
        assert_eq!(table.cell(0, "B"), "");
        table.set_cell(0, "B", "x");
        assert_eq!(table.cell(0, "B"), "x");
    }

    #[test]
    fn col2_finds_the_alternate_spelling() {
        let table = SourceTable::from_label_and_rows(&strings(&["status"]), &[strings(&["Paid"])]);
        assert_eq!(table.col2("Status", "status"), Some(0));
        assert_eq!(table.col2("Status", "missing"), None);
    }

    #[test]
    fn normalize_gift_date_handles_the_source_formats() {
        assert_eq!(normalize_gift_date("2022-01-25T19:48:48Z"), "01/25/2022");
        assert_eq!(normalize_gift_date("12/31/2022 23:59"), "12/31/2022");
        assert_eq!(normalize_gift_date("1/18/2022"), "01/18/2022");
        assert_eq!(normalize_gift_date("2022-01-18"), "01/18/2022");
        assert_eq!(normalize_gift_date("December 24, 2021"), "12/24/2021");
        // Unparseable values pass through.
        assert_eq!(normalize_gift_date("soon"), "soon");
        assert_eq!(normalize_gift_date(""), "");
    }

    #[test]
    fn parse_ledger_date_only_accepts_full_dates() {
        assert_eq!(parse_ledger_date("12/24/2021"), Some("12/24/2021".to_string()));
        assert_eq!(parse_ledger_date("1/1/2022"), Some("01/01/2022".to_string()));
        assert_eq!(parse_ledger_date("Deposit"), None);
        assert_eq!(parse_ledger_date(""), None);
    }

    #[test]
    fn format_float_trims_integral_values() {
        assert_eq!(format_float(4012.0), "4012");
        assert_eq!(format_float(551.74), "551.74");
    }
}
