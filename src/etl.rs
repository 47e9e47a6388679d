use log::{debug, info};

use snafu::{prelude::*, Snafu};

use std::cell::RefCell;

use donor_records::{
    DonorRecord, DonorTable, Field, FieldMap, MapTarget, BENEVITY_LABEL_ROW, BENEVITY_MAP,
    FIDELITY_MAP, QUICKBOOKS_MAP, STRIPE_MAP, YOURCAUSE_MAP,
};

use crate::args::Args;

pub use crate::etl::config_reader::{read_settings, Settings, DEFAULT_SETTINGS_FILE};
pub use crate::etl::io_common::{RawTable, SourceTable};
pub use crate::etl::lgl::{LglApi, RateLimiter};
pub use crate::etl::messages::MessageLog;
pub use crate::etl::validator::ConstituentDataValidator;

pub mod config_reader;
pub mod io_benevity;
pub mod io_common;
pub mod io_fidelity;
pub mod io_quickbooks;
pub mod io_stripe;
pub mod io_yourcause;
pub mod lgl;
pub mod messages;
pub mod validator;

pub const DEFAULT_OUTPUT_FILE: &str = "lgl.csv";

#[derive(Debug, Snafu)]
pub enum EtlError {
    #[snafu(display("The file {path} is empty"))]
    EmptyInput { path: String },

    #[snafu(display("Error opening spreadsheet {path}"))]
    OpeningWorkbook {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("The spreadsheet {path} has no worksheets"))]
    EmptyWorkbook { path: String },
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error parsing a CSV row in {path}"))]
    CsvLineParse { source: csv::Error, path: String },
    #[snafu(display("The file {path} is neither an Excel file nor a CSV file"))]
    UnsupportedExtension { path: String },

    #[snafu(display(
        "The columns of {path} do not match any known donor file source. \
         Run with --verbose for a column-by-column comparison"
    ))]
    UnrecognizedFormat { path: String },
    #[snafu(display("The file {path} has no donor name column; identities cannot be resolved"))]
    MissingNameColumn { path: String },
    #[snafu(display("The report {path} ends before the donation rows start"))]
    TruncatedReport { path: String },

    #[snafu(display("Error reading the settings file {path}"))]
    OpeningSettings {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the settings file {path}"))]
    ParsingSettings {
        source: serde_json::Error,
        path: String,
    },

    #[snafu(display("Error building the HTTP client"))]
    HttpClient { source: reqwest::Error },
    #[snafu(display("The HTTP request to {url} failed"))]
    HttpRequest { source: reqwest::Error, url: String },
    #[snafu(display("{url} returned HTTP status {status}"))]
    HttpStatus { status: u16, url: String },
    #[snafu(display("Error decoding the response from {url}"))]
    DecodingResponse { source: reqwest::Error, url: String },
    #[snafu(display("The response from {url} did not have the expected shape"))]
    UnexpectedResponseShape {
        source: serde_json::Error,
        url: String,
    },
    #[snafu(display(
        "The CRM API quota is exhausted (HTTP 429). Stop running imports and \
         contact the CRM support team before trying again; continuing risks a longer lockout"
    ))]
    QuotaExhausted {},

    #[snafu(display("No input files were given; pass at least one --input"))]
    NoInputFiles {},
    #[snafu(display("No donor rows were produced from the input files; no output file was written"))]
    EmptyRun {},
    #[snafu(display("Error writing {path}"))]
    WritingOutput { source: csv::Error, path: String },
    #[snafu(display("Error flushing {path}"))]
    FlushingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error opening the variance file {path}"))]
    OpeningVarianceFile {
        source: std::io::Error,
        path: String,
    },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type EtlResult<T> = Result<T, EtlError>;
pub type BEtlResult<T> = Result<T, Box<EtlError>>;

/// Shared run-wide state, built once in `run_import` and threaded through
/// every component: the API call pacing window and the operator-facing
/// message collection. There is deliberately exactly one of each per run.
pub struct RunContext {
    pub limiter: RefCell<RateLimiter>,
    pub messages: RefCell<MessageLog>,
}

impl RunContext {
    pub fn new() -> RunContext {
        RunContext {
            limiter: RefCell::new(RateLimiter::new()),
            messages: RefCell::new(MessageLog::new()),
        }
    }

    /// Logs at info level and keeps the message for the end-of-run summary.
    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.messages.borrow_mut().save(message);
    }

    /// Logs at error level and keeps the message for the end-of-run summary.
    pub fn notify_error(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        self.messages.borrow_mut().save_error(message);
    }
}

impl Default for RunContext {
    fn default() -> Self {
        RunContext::new()
    }
}

/// The five donor file sources this program understands.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum SourceKind {
    Fidelity,
    Benevity,
    Stripe,
    YourCause,
    QuickBooks,
}

impl SourceKind {
    pub fn name(self) -> &'static str {
        match self {
            SourceKind::Fidelity => "Fidelity",
            SourceKind::Benevity => "Benevity",
            SourceKind::Stripe => "Stripe",
            SourceKind::YourCause => "YourCause",
            SourceKind::QuickBooks => "QuickBooks",
        }
    }
}

/// Picks the source adapter for a freshly read file by matching its column
/// labels against the known field maps.
///
/// Label-oriented sources are recognized from the first row; Benevity's
/// label row sits at a fixed offset below the report preamble, and
/// QuickBooks ledgers are recognized from their positional label row. The
/// check order only matters in that no real-world source's column set may
/// cover another's; that property is asserted in the map tests rather than
/// enforced here.
pub fn select_source(raw: &RawTable, path: &str) -> EtlResult<SourceKind> {
    static EMPTY_ROW: Vec<String> = Vec::new();
    let header = raw.rows.first().unwrap_or(&EMPTY_ROW);
    if FIDELITY_MAP.covers(header) {
        return Ok(SourceKind::Fidelity);
    }
    if STRIPE_MAP.covers(header) {
        return Ok(SourceKind::Stripe);
    }
    if YOURCAUSE_MAP.covers(header) {
        return Ok(SourceKind::YourCause);
    }
    if let Some(label_row) = raw.rows.get(BENEVITY_LABEL_ROW) {
        if BENEVITY_MAP.covers(label_row) {
            return Ok(SourceKind::Benevity);
        }
    }
    if io_quickbooks::find_label_row(raw).is_some() {
        return Ok(SourceKind::QuickBooks);
    }

    // No match: dump a comparison of the file columns against every map to
    // make the formatting problem findable.
    for map in [&FIDELITY_MAP, &STRIPE_MAP, &YOURCAUSE_MAP] {
        log_key_comparison(header, map);
    }
    if let Some(label_row) = raw.rows.get(BENEVITY_LABEL_ROW) {
        log_key_comparison(label_row, &BENEVITY_MAP);
    }
    UnrecognizedFormatSnafu { path }.fail()
}

fn log_key_comparison(labels: &[String], map: &FieldMap) {
    debug!("------------------------- {} comparison", map.source);
    let unknown = map.unknown_labels(labels);
    if unknown.is_empty() {
        debug!("No input columns are unknown to the {} map.", map.source);
    }
    for label in unknown {
        debug!(
            "Input column {:?} is not found in the {} map.",
            label, map.source
        );
    }
    for label in map.missing_labels(labels) {
        debug!(
            "The {} map column {:?} is not found in the input.",
            map.source, label
        );
    }
}

/// Renames the native columns of an unpacked source table into the
/// canonical schema and attaches the resolved constituent ids.
///
/// Columns marked `Ignore` in the map are dropped; columns absent from the
/// map are dropped with a debug note. When two native spellings feed the
/// same canonical field (Stripe), the non-empty one wins.
pub fn map_fields(donor_data: &SourceTable, map: &FieldMap, ids: Vec<String>) -> DonorTable {
    debug!("map_fields: mapping {} rows with the {} map", donor_data.len(), map.source);
    let mut table = DonorTable::new();
    table.ensure_column(Field::ConstituentId);
    for label in donor_data.columns() {
        match map.target(label) {
            Some(MapTarget::To(field)) => table.ensure_column(field),
            Some(MapTarget::Ignore) => debug!("Ignoring column {:?}.", label),
            None => debug!(
                "The input column {:?} was not found in the {} field map. It will be ignored.",
                label, map.source
            ),
        }
    }
    for (i, row) in donor_data.rows().iter().enumerate() {
        let mut record = DonorRecord::new();
        for (ci, label) in donor_data.columns().iter().enumerate() {
            if let Some(MapTarget::To(field)) = map.target(label) {
                let value = row.get(ci).map(|v| v.trim()).unwrap_or("");
                if !value.is_empty() || record.is_blank(field) {
                    record.set(field, value);
                }
            }
        }
        record.set(Field::ConstituentId, ids.get(i).cloned().unwrap_or_default());
        table.push(record);
    }
    table
}

/// Reads one donor file end to end: decode, recognize the source, unpack,
/// resolve constituent ids, map into the canonical schema and apply the
/// source's computed fields.
fn process_file(
    path: &str,
    settings: &Settings,
    lgl: &LglApi,
    ctx: &RunContext,
) -> BEtlResult<DonorTable> {
    let raw = io_common::read_raw_file(path)?;
    let kind = select_source(&raw, path)?;
    info!("The file {:?} was recognized as a {} export.", path, kind.name());
    let table = match kind {
        SourceKind::Fidelity => {
            let mut donor_data = io_fidelity::unpack(&raw, path)?;
            let ids = io_fidelity::resolve_ids(&mut donor_data, lgl, path, ctx)?;
            let mut table = map_fields(&donor_data, &FIDELITY_MAP, ids);
            io_fidelity::finalize(&donor_data, &mut table);
            table
        }
        SourceKind::Benevity => {
            let donor_data = io_benevity::unpack(&raw, path)?;
            let ids = io_benevity::resolve_ids(&donor_data, lgl, path, ctx)?;
            map_fields(&donor_data, &BENEVITY_MAP, ids)
        }
        SourceKind::Stripe => {
            let donor_data = io_stripe::unpack(&raw, settings, path, ctx)?;
            let ids = io_stripe::resolve_ids(&donor_data, lgl, path, ctx)?;
            let mut table = map_fields(&donor_data, &STRIPE_MAP, ids);
            io_stripe::finalize(&mut table);
            table
        }
        SourceKind::YourCause => {
            let donor_data = io_yourcause::unpack(&raw, path)?;
            let ids = io_yourcause::resolve_ids(&donor_data, lgl, path, ctx)?;
            let mut table = map_fields(&donor_data, &YOURCAUSE_MAP, ids);
            io_yourcause::finalize(&donor_data, &mut table);
            table
        }
        SourceKind::QuickBooks => {
            let donor_data = io_quickbooks::unpack(&raw, path, ctx)?;
            let ids = io_quickbooks::resolve_ids(&donor_data, lgl, path, ctx)?;
            let mut table = map_fields(&donor_data, &QUICKBOOKS_MAP, ids);
            io_quickbooks::finalize(&donor_data, &mut table);
            table
        }
    };
    Ok(table)
}

/// Writes the merged table as the CRM import file. Gift dates are brought
/// to a single representation on the way out.
fn write_import_file(table: &DonorTable, path: &str) -> BEtlResult<()> {
    let columns: Vec<Field> = Field::ALL
        .iter()
        .copied()
        .filter(|f| table.has_column(*f))
        .collect();
    let mut writer = csv::Writer::from_path(path).context(WritingOutputSnafu { path })?;
    writer
        .write_record(columns.iter().map(|f| f.column_name()))
        .context(WritingOutputSnafu { path })?;
    for record in table.records() {
        let row: Vec<String> = columns
            .iter()
            .map(|f| {
                if *f == Field::GiftDate {
                    io_common::normalize_gift_date(record.get(*f))
                } else {
                    record.get(*f).to_string()
                }
            })
            .collect();
        writer.write_record(&row).context(WritingOutputSnafu { path })?;
    }
    writer.flush().context(FlushingOutputSnafu { path })?;
    Ok(())
}

fn print_messages(ctx: &RunContext) {
    let messages = ctx.messages.borrow();
    if !messages.is_empty() {
        println!("\nItems needing attention:\n- {}", messages.to_bulleted_string());
    }
}

/// The whole pipeline: read every input file, merge the canonical tables,
/// write the import file and (optionally) run the variance check.
///
/// A file that cannot be processed is reported and skipped; the run goes on
/// with the remaining files. An exhausted API quota ends the run
/// immediately.
pub fn run_import(parsed: &Args) -> BEtlResult<()> {
    if parsed.input.is_empty() {
        return Err(Box::new(EtlError::NoInputFiles {}));
    }
    let settings_path = parsed
        .settings
        .clone()
        .unwrap_or_else(|| DEFAULT_SETTINGS_FILE.to_string());
    let settings = read_settings(&settings_path)?;
    let output_path = parsed
        .output
        .clone()
        .unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string());

    let ctx = RunContext::new();
    let lgl = LglApi::new(&settings)?;

    let mut merged = DonorTable::new();
    for input_file in &parsed.input {
        info!("-------------------- Reading file {:?} --------------------", input_file);
        match process_file(input_file, &settings, &lgl, &ctx) {
            Ok(table) => {
                info!("Read {} donation rows from {:?}.", table.len(), input_file);
                merged.append(table);
            }
            Err(e) => {
                if matches!(e.as_ref(), EtlError::QuotaExhausted {}) {
                    print_messages(&ctx);
                    return Err(e);
                }
                ctx.notify_error(format!(
                    "The file {:?} could not be processed and was skipped: {}",
                    input_file, e
                ));
            }
        }
    }

    if merged.is_empty() {
        print_messages(&ctx);
        return Err(Box::new(EtlError::EmptyRun {}));
    }

    write_import_file(&merged, &output_path)?;
    info!("Wrote {} rows to {:?}.", merged.len(), output_path);

    if let Some(variance_path) = &parsed.variance_file {
        let mut validator = ConstituentDataValidator::new(&lgl);
        for record in merged.records() {
            if let Err(e) = validator.validate_record(record, &ctx) {
                if matches!(e.as_ref(), EtlError::QuotaExhausted {}) {
                    print_messages(&ctx);
                    return Err(e);
                }
                ctx.notify_error(format!(
                    "A record could not be checked against the CRM: {}",
                    e
                ));
            }
        }
        validator.flush(variance_path)?;
    }

    print_messages(&ctx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(rows: Vec<Vec<&str>>) -> RawTable {
        RawTable {
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn select_source_recognizes_fidelity_from_the_header() {
        let table = raw(vec![
            vec!["Addressee Name", "Grant Id", "Grant Amount", "Effective Date"],
            vec!["John Smith", "17309716", "10", "1/18/2022"],
        ]);
        assert_eq!(select_source(&table, "f.xlsx").unwrap(), SourceKind::Fidelity);
    }

    #[test]
    fn select_source_recognizes_benevity_at_the_label_offset() {
        let mut rows = vec![vec!["Donations Report"], vec!["#----"]];
        rows.extend(std::iter::repeat(vec![""]).take(BENEVITY_LABEL_ROW - 2));
        rows.push(vec!["Company", "Donation Date", "Donor First Name", "Donor Last Name"]);
        rows.push(vec!["Acme", "2022-01-25T19:48:48Z", "Jane", "Doe"]);
        rows.push(vec!["Totals", "", "", ""]);
        let table = raw(rows);
        assert_eq!(select_source(&table, "b.csv").unwrap(), SourceKind::Benevity);
    }

    #[test]
    fn select_source_recognizes_yourcause() {
        let table = raw(vec![
            vec!["Id", "Amount", "DateCreated", "PaymentStatus", "ProcessingPartnerName"],
            vec!["12192042", "650", "4/6/2022 0:00", "Cleared", "The Blackbaud Giving Fund"],
        ]);
        assert_eq!(select_source(&table, "y.csv").unwrap(), SourceKind::YourCause);
    }

    #[test]
    fn select_source_rejects_unknown_columns() {
        let table = raw(vec![
            vec!["Some Column", "Another Column"],
            vec!["a", "b"],
        ]);
        let err = select_source(&table, "odd.csv").unwrap_err();
        assert!(matches!(err, EtlError::UnrecognizedFormat { .. }));
    }

    #[test]
    fn select_source_rejects_empty_files() {
        let table = raw(vec![]);
        let err = select_source(&table, "empty.csv").unwrap_err();
        assert!(matches!(err, EtlError::UnrecognizedFormat { .. }));
    }

    #[test]
    fn map_fields_renames_columns_and_attaches_ids() {
        let donor_data = SourceTable::from_label_and_rows(
            &[
                "Addressee Name".to_string(),
                "Grant Amount".to_string(),
                "Recommended By".to_string(),
            ],
            &[
                vec!["John Smith".to_string(), "25".to_string(), "Online".to_string()],
                vec!["Jane Doe".to_string(), "50".to_string(), "Online".to_string()],
            ],
        );
        let table = map_fields(
            &donor_data,
            &FIDELITY_MAP,
            vec!["101".to_string(), String::new()],
        );
        assert_eq!(table.len(), 2);
        assert!(table.has_column(Field::FullName));
        assert!(table.has_column(Field::GiftAmount));
        // "Recommended By" is an ignored column.
        assert!(!table.has_column(Field::GiftNote));
        assert_eq!(table.records()[0].get(Field::FullName), "John Smith");
        assert_eq!(table.records()[0].get(Field::ConstituentId), "101");
        assert_eq!(table.records()[1].get(Field::ConstituentId), "");
    }

    #[test]
    fn map_fields_prefers_the_non_empty_dual_spelling() {
        let donor_data = SourceTable::from_label_and_rows(
            &[
                "Customer Description".to_string(),
                "customer_description".to_string(),
            ],
            &[vec![String::new(), "Jane Doe".to_string()]],
        );
        let table = map_fields(&donor_data, &STRIPE_MAP, vec![String::new()]);
        assert_eq!(table.records()[0].get(Field::FullName), "Jane Doe");
    }

    #[test]
    fn write_import_file_normalizes_gift_dates() {
        let donor_data = SourceTable::from_label_and_rows(
            &["Donation Date".to_string(), "Donor First Name".to_string()],
            &[vec!["2022-01-25T19:48:48Z".to_string(), "Jane".to_string()]],
        );
        let table = map_fields(&donor_data, &BENEVITY_MAP, vec![String::new()]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lgl.csv");
        write_import_file(&table, path.to_str().unwrap()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let mut lines = written.lines();
        let header = lines.next().unwrap();
        assert!(header.contains("Gift date"));
        assert!(header.contains("LGL Constituent ID"));
        assert!(lines.next().unwrap().contains("01/25/2022"));
    }
}
