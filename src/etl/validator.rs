// Checks the donor data carried by the input files against what the CRM
// has on record, and writes the differences to a variance report for a
// human to reconcile. The CRM stays the system of record: nothing here
// writes back, it only reports.

use std::collections::HashMap;
use std::fs::OpenOptions;

use log::{debug, info};
use snafu::prelude::*;

use donor_records::{normalize_street, DonorRecord, Field, PackedAddress};

use crate::etl::lgl::ConstituentDetail;
use crate::etl::*;

/// Sources that hide donor data emit this literal instead of a value.
/// It means "no data to compare", not a mismatch.
pub const NOT_SHARED_SENTINEL: &str = "Not shared by donor";

const VARIANCE_HEADER: [&str; 8] = [
    "LGL_ID",
    "LGL_name",
    "LGL_email",
    "LGL_address",
    "input_name",
    "input_email",
    "input_address",
    "varying_fields",
];

fn is_not_shared(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(NOT_SHARED_SENTINEL)
}

fn differs(input: &str, crm: &str) -> bool {
    !input.trim().eq_ignore_ascii_case(crm.trim())
}

/// Name fields that differ from the CRM record. Blank and "not shared"
/// inputs are skipped, not flagged.
pub fn check_name(detail: &ConstituentDetail, first: &str, last: &str) -> Vec<String> {
    let mut varying = Vec::new();
    if !first.trim().is_empty() && !is_not_shared(first) && differs(first, &detail.first_name) {
        varying.push("First name".to_string());
    }
    if !last.trim().is_empty() && !is_not_shared(last) && differs(last, &detail.last_name) {
        varying.push("Last name".to_string());
    }
    varying
}

/// Flags the email when it is not among the CRM's stored addresses for
/// this constituent (compared case-insensitively).
pub fn check_email(detail: &ConstituentDetail, email: &str) -> Vec<String> {
    let email = email.trim();
    if email.is_empty() || is_not_shared(email) {
        return Vec::new();
    }
    let known = detail
        .email_addresses
        .iter()
        .any(|e| e.address.trim().eq_ignore_ascii_case(email));
    if known {
        Vec::new()
    } else {
        vec!["Email".to_string()]
    }
}

/// Compares the input address against the CRM's primary address, one named
/// variance per differing attribute.
///
/// Streets are normalized on both sides before comparing so "123 North
/// Main Street" and "123 N Main St" agree. Postal codes are compared by
/// containment: the CRM stores extended nine-digit codes while the input
/// is typically five digits.
pub fn check_address(detail: &ConstituentDetail, input: &PackedAddress) -> Vec<String> {
    if input.line1.trim().is_empty() || is_not_shared(&input.line1) {
        return Vec::new();
    }
    let fallback = Default::default();
    let crm = detail.preferred_address().unwrap_or(&fallback);
    let mut varying = Vec::new();
    if normalize_street(&input.line1) != normalize_street(&crm.street) {
        varying.push("Street address".to_string());
    }
    if !is_not_shared(&input.city) && differs(&input.city, &crm.city) {
        varying.push("City".to_string());
    }
    if !is_not_shared(&input.state) && differs(&input.state, &crm.state) {
        varying.push("State".to_string());
    }
    let input_postal = input.postal.trim();
    let crm_postal = crm.postal_code.trim();
    if !input_postal.is_empty() && !is_not_shared(input_postal) {
        let contained =
            crm_postal.contains(input_postal) || input_postal.contains(crm_postal);
        if !contained || crm_postal.is_empty() {
            varying.push("Postal code".to_string());
        }
    }
    varying
}

// One accumulated variance row, merging every kind of difference found for
// the same constituent.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
struct VarianceEntry {
    lgl_name: String,
    lgl_email: String,
    lgl_address: String,
    input_name: String,
    input_email: String,
    input_address: String,
    fields: Vec<String>,
}

/// Validates resolved records against the CRM and accumulates variances
/// until `flush` writes them out.
pub struct ConstituentDataValidator<'a> {
    lgl: &'a LglApi,
    // Detail fetches are memoized so repeat donors cost one call.
    details: HashMap<String, ConstituentDetail>,
    variances: HashMap<String, VarianceEntry>,
}

impl<'a> ConstituentDataValidator<'a> {
    pub fn new(lgl: &'a LglApi) -> ConstituentDataValidator<'a> {
        ConstituentDataValidator {
            lgl,
            details: HashMap::new(),
            variances: HashMap::new(),
        }
    }

    /// Checks one canonical record. Records without a resolved id are
    /// skipped; there is nothing to compare them to.
    pub fn validate_record(&mut self, record: &DonorRecord, ctx: &RunContext) -> BEtlResult<()> {
        let constituent_id = record.get(Field::ConstituentId).trim().to_string();
        if constituent_id.is_empty() {
            debug!("validate_record: skipping a record with no constituent id");
            return Ok(());
        }
        let detail = self.constituent_detail(&constituent_id, ctx)?;

        let (first, last) = input_name_parts(record);
        let input_address = input_address(record);
        let mut varying = check_name(&detail, &first, &last);
        varying.extend(check_email(&detail, record.get(Field::Email)));
        varying.extend(check_address(&detail, &input_address));
        if varying.is_empty() {
            return Ok(());
        }
        info!(
            "Constituent {} differs from the CRM record: {}",
            constituent_id,
            varying.join(", ")
        );
        let entry = self.variances.entry(constituent_id).or_default();
        entry.lgl_name = detail.display_name();
        entry.lgl_email = detail
            .preferred_email()
            .map(|e| e.address.clone())
            .unwrap_or_default();
        entry.lgl_address = format_crm_address(&detail);
        entry.input_name = format!("{} {}", first, last).trim().to_string();
        entry.input_email = record.get(Field::Email).trim().to_string();
        entry.input_address = format_input_address(&input_address);
        for field in varying {
            if !entry.fields.contains(&field) {
                entry.fields.push(field);
            }
        }
        Ok(())
    }

    fn constituent_detail(
        &mut self,
        constituent_id: &str,
        ctx: &RunContext,
    ) -> BEtlResult<ConstituentDetail> {
        if let Some(detail) = self.details.get(constituent_id) {
            return Ok(detail.clone());
        }
        let detail = self.lgl.get_constituent_info(constituent_id, ctx)?;
        self.details
            .insert(constituent_id.to_string(), detail.clone());
        Ok(detail)
    }

    /// Appends the accumulated variances to the report file, one merged
    /// row per constituent. The header is only written when the file is
    /// new or empty, so repeated runs accumulate into one report.
    pub fn flush(&self, path: &str) -> BEtlResult<()> {
        if self.variances.is_empty() {
            info!("No variances were found.");
            return Ok(());
        }
        let needs_header = match std::fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(OpeningVarianceFileSnafu { path })?;
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(file);
        if needs_header {
            writer
                .write_record(VARIANCE_HEADER)
                .context(WritingOutputSnafu { path })?;
        }
        let mut ordered: Vec<(&String, &VarianceEntry)> = self.variances.iter().collect();
        ordered.sort_by_key(|(id, _)| id.parse::<i64>().unwrap_or(i64::MAX));
        for (constituent_id, entry) in &ordered {
            writer
                .write_record([
                    constituent_id.as_str(),
                    entry.lgl_name.as_str(),
                    entry.lgl_email.as_str(),
                    entry.lgl_address.as_str(),
                    entry.input_name.as_str(),
                    entry.input_email.as_str(),
                    entry.input_address.as_str(),
                    entry.fields.join("; ").as_str(),
                ])
                .context(WritingOutputSnafu { path })?;
        }
        writer.flush().context(FlushingOutputSnafu { path })?;
        info!("Wrote {} variance rows to {:?}.", ordered.len(), path);
        Ok(())
    }
}

// The donor name as the input file carried it. Sources without discrete
// first/last columns get their full name split when it is unambiguous.
fn input_name_parts(record: &DonorRecord) -> (String, String) {
    let first = record.get(Field::FirstName).trim();
    let last = record.get(Field::LastName).trim();
    if !first.is_empty() || !last.is_empty() {
        return (first.to_string(), last.to_string());
    }
    let full: Vec<&str> = record.get(Field::FullName).split_whitespace().collect();
    match full.as_slice() {
        [first, last] => (first.to_string(), last.to_string()),
        _ => (String::new(), String::new()),
    }
}

fn input_address(record: &DonorRecord) -> PackedAddress {
    PackedAddress {
        line1: record.get(Field::AddressLine1).trim().to_string(),
        line2: record.get(Field::AddressLine2).trim().to_string(),
        line3: record.get(Field::AddressLine3).trim().to_string(),
        city: record.get(Field::City).trim().to_string(),
        state: record.get(Field::State).trim().to_string(),
        postal: record.get(Field::PostalCode).trim().to_string(),
    }
}

fn format_input_address(address: &PackedAddress) -> String {
    [
        address.line1.as_str(),
        address.line2.as_str(),
        address.line3.as_str(),
        address.city.as_str(),
        address.state.as_str(),
        address.postal.as_str(),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .cloned()
    .collect::<Vec<&str>>()
    .join(", ")
}

fn format_crm_address(detail: &ConstituentDetail) -> String {
    match detail.preferred_address() {
        Some(address) => [
            address.street.as_str(),
            address.city.as_str(),
            address.state.as_str(),
            address.postal_code.as_str(),
        ]
        .iter()
        .filter(|part| !part.trim().is_empty())
        .cloned()
        .collect::<Vec<&str>>()
        .join(", "),
        None => String::new(),
    }
}
