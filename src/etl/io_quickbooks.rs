// Reader for QuickBooks deposit-detail exports.
//
// The export is a multi-section ledger, not a labeled table: a deposit row
// carries the date, and the donation rows follow underneath it with a
// check/reference number but no date of their own. Column identity is
// positional, taken from wherever the label row put each label. Donation
// rows that originated in another platform (the ledger mixes Benevity,
// Stripe and friends into the same deposits) are skipped so the same gift
// is never imported twice.

use std::collections::HashMap;

use log::debug;
use snafu::OptionExt;

use donor_records::{
    DonorTable, Field, QB_AMOUNT, QB_DATE, QB_DONOR, QB_MEMO, QB_NUM, QB_VENDOR,
};

use crate::etl::io_common::parse_ledger_date;
use crate::etl::*;

/// Memo markers of donations that arrive through another source.
pub const OTHER_SOURCE_MARKERS: [&str; 4] = ["Benevity", "Fidelity", "Stripe", "YourCause"];

const LABEL_PROBES: [&str; 4] = [QB_DATE, QB_NUM, QB_DONOR, QB_AMOUNT];

/// Finds the ledger's label row: the row that carries all the positional
/// labels. Also used by the format selector to recognize these files.
pub fn find_label_row(raw: &RawTable) -> Option<usize> {
    raw.rows.iter().position(|row| {
        LABEL_PROBES
            .iter()
            .all(|probe| row.iter().any(|cell| cell.trim() == *probe))
    })
}

/// True for the check/reference cell of a donation row. The values come
/// through as integers, strings or hyphenated strings ("618-1"), so
/// anything made of digits and hyphens with at least one digit counts.
pub fn is_check_reference(cell: &str) -> bool {
    !cell.is_empty()
        && cell.chars().any(|c| c.is_ascii_digit())
        && cell.chars().all(|c| c.is_ascii_digit() || c == '-')
}

/// Walks the ledger and emits one row per donation: a date cell opens a
/// deposit section, and every following row with a check/reference number
/// belongs to it. The donor name falls back to the vendor column, and rows
/// whose memo names another donation source are skipped entirely.
pub fn unpack(raw: &RawTable, path: &str, ctx: &RunContext) -> BEtlResult<SourceTable> {
    let label_idx = find_label_row(raw).context(UnrecognizedFormatSnafu { path })?;
    let labels = &raw.rows[label_idx];
    let position = |name: &str| labels.iter().position(|cell| cell.trim() == name);
    let date_col = position(QB_DATE).context(UnrecognizedFormatSnafu { path })?;
    let num_col = position(QB_NUM).context(UnrecognizedFormatSnafu { path })?;
    let donor_col = position(QB_DONOR).context(MissingNameColumnSnafu { path })?;
    let vendor_col = position(QB_VENDOR);
    let memo_col = position(QB_MEMO);
    let amount_col = position(QB_AMOUNT);

    let mut donor_data = SourceTable::new(
        [QB_DATE, QB_NUM, QB_DONOR, QB_MEMO, QB_AMOUNT]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    let mut current_date: Option<String> = None;
    for row in &raw.rows[label_idx + 1..] {
        if let Some(date) = row.get(date_col).and_then(|c| parse_ledger_date(c)) {
            // A deposit row: it opens a section but is not itself a donation.
            current_date = Some(date);
            continue;
        }
        let date = match &current_date {
            Some(date) => date.clone(),
            None => continue,
        };
        let num = row.get(num_col).map(|c| c.trim()).unwrap_or("");
        if !is_check_reference(num) {
            continue;
        }
        let mut donor = row.get(donor_col).map(|c| c.trim()).unwrap_or("").to_string();
        if donor.is_empty() {
            donor = vendor_col
                .and_then(|c| row.get(c))
                .map(|c| c.trim())
                .unwrap_or("")
                .to_string();
        }
        if donor.is_empty() {
            ctx.notify(format!(
                "The row with check number {} in the file {:?} has no donor or vendor name; \
                 it was skipped.",
                num, path
            ));
            continue;
        }
        let memo = memo_col
            .and_then(|c| row.get(c))
            .map(|c| c.trim())
            .unwrap_or("")
            .to_string();
        if let Some(marker) = OTHER_SOURCE_MARKERS
            .iter()
            .find(|m| memo.to_lowercase().contains(&m.to_lowercase()))
        {
            debug!(
                "Skipping a {} donation found in the ledger {:?} (check {}).",
                marker, path, num
            );
            continue;
        }
        let amount = amount_col
            .and_then(|c| row.get(c))
            .map(|c| c.trim())
            .unwrap_or("")
            .to_string();
        donor_data.push_row(vec![date, num.to_string(), donor, memo, amount]);
    }
    Ok(donor_data)
}

/// Resolves ids by the donor column, memoizing repeated names.
pub fn resolve_ids(
    donor_data: &SourceTable,
    lgl: &LglApi,
    path: &str,
    ctx: &RunContext,
) -> BEtlResult<Vec<String>> {
    let donor_col = donor_data
        .col(QB_DONOR)
        .context(MissingNameColumnSnafu { path })?;
    let mut lgl_ids: Vec<String> = Vec::with_capacity(donor_data.len());
    let mut names_found: HashMap<String, String> = HashMap::new();
    for index in 0..donor_data.len() {
        let name = donor_data.cell_at(index, donor_col).trim().to_string();
        let cid = if name.is_empty() {
            String::new()
        } else if let Some(known) = names_found.get(&name) {
            known.clone()
        } else {
            let cid = lgl.find_constituent_id(&name, "", path, ctx)?;
            names_found.insert(name.clone(), cid.clone());
            cid
        };
        lgl_ids.push(cid);
    }
    Ok(lgl_ids)
}

/// Ledger donations are checks; the check number leads the gift note.
pub fn finalize(donor_data: &SourceTable, output: &mut DonorTable) {
    output.ensure_column(Field::CampaignName);
    output.ensure_column(Field::PaymentType);
    output.ensure_column(Field::GiftNote);
    for (index, record) in output.records_mut().iter_mut().enumerate() {
        record.set(Field::CampaignName, "General");
        record.set(Field::PaymentType, "Check");
        let num = donor_data.cell(index, QB_NUM).trim().to_string();
        let memo = record.get(Field::GiftNote).trim().to_string();
        let note = if memo.is_empty() {
            format!("Check # {}", num)
        } else {
            format!("Check # {}; {}", num, memo)
        };
        record.set(Field::GiftNote, note);
    }
}
