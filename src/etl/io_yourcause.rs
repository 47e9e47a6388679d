// Reader for YourCause / Blackbaud payment exports.
//
// The export is a payment ledger: one row per disbursement, with a status
// column. Only rows whose status is exactly "Cleared" represent money that
// actually arrived; everything else (Voided, Pending, reissues) is dropped
// outright.

use std::collections::HashMap;

use log::warn;
use snafu::OptionExt;

use donor_records::{
    DonorTable, Field, YC_CLEARED, YC_PAYMENT_NUMBER, YC_PAYMENT_STATUS,
    YC_PROCESSING_PARTNER_NAME,
};

use crate::etl::*;

pub fn unpack(raw: &RawTable, path: &str) -> BEtlResult<SourceTable> {
    let labels = raw.rows.first().context(EmptyInputSnafu { path })?;
    let mut donor_data = SourceTable::from_label_and_rows(labels, &[]);
    let status_col = donor_data.col(YC_PAYMENT_STATUS);
    if status_col.is_none() {
        warn!(
            "The file {:?} has no {:?} column; every row was kept.",
            path, YC_PAYMENT_STATUS
        );
    }
    for row in &raw.rows[1..] {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        if let Some(status_col) = status_col {
            if row.get(status_col).map(|s| s.trim()) != Some(YC_CLEARED) {
                continue;
            }
        }
        donor_data.push_row(row.clone());
    }
    Ok(donor_data)
}

/// Resolves ids by the processing partner name (the giving fund that
/// disbursed the payment), memoizing repeated names within the run.
pub fn resolve_ids(
    donor_data: &SourceTable,
    lgl: &LglApi,
    path: &str,
    ctx: &RunContext,
) -> BEtlResult<Vec<String>> {
    let name_col = donor_data
        .col(YC_PROCESSING_PARTNER_NAME)
        .context(MissingNameColumnSnafu { path })?;
    let mut lgl_ids: Vec<String> = Vec::with_capacity(donor_data.len());
    let mut names_found: HashMap<String, String> = HashMap::new();
    for index in 0..donor_data.len() {
        let name = donor_data.cell_at(index, name_col).trim().to_string();
        let cid = if name.is_empty() {
            ctx.notify(format!(
                "Row {} of the file {:?} has no donor name; no constituent lookup was made.",
                index + 1,
                path
            ));
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

/// The payment type column passes through the map; the payment number only
/// survives as part of the gift note.
pub fn finalize(donor_data: &SourceTable, output: &mut DonorTable) {
    output.ensure_column(Field::CampaignName);
    output.ensure_column(Field::GiftNote);
    let number_col = donor_data.col(YC_PAYMENT_NUMBER);
    for (index, record) in output.records_mut().iter_mut().enumerate() {
        record.set(Field::CampaignName, "General");
        if let Some(number_col) = number_col {
            let number = donor_data.cell_at(index, number_col).trim();
            if !number.is_empty() {
                record.set(Field::GiftNote, format!("Payment # {}", number));
            }
        }
    }
}
