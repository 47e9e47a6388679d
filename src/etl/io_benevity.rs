// Reader for Benevity donation reports.
//
// A Benevity report is a CSV dump with a metadata preamble (charity name,
// period, disbursement id), the column labels at a fixed offset, the
// donation rows, and a "Totals" trailer followed by summary lines. Only
// the span between the label row and the trailer is donation data, and the
// rows are re-keyed by a derived sequential index so the preamble and
// trailer can never leak into the canonical table.

use log::warn;

use snafu::OptionExt;

use donor_records::{BEN_DONOR_FIRST_NAME, BEN_DONOR_LAST_NAME, BENEVITY_LABEL_ROW, BENEVITY_TRAILER};

use crate::etl::*;

pub fn unpack(raw: &RawTable, path: &str) -> BEtlResult<SourceTable> {
    if raw.rows.len() <= BENEVITY_LABEL_ROW + 1 {
        return Err(Box::new(EtlError::TruncatedReport {
            path: path.to_string(),
        }));
    }
    let labels = &raw.rows[BENEVITY_LABEL_ROW];
    let mut donor_rows: Vec<Vec<String>> = Vec::new();
    let mut saw_trailer = false;
    for row in &raw.rows[BENEVITY_LABEL_ROW + 1..] {
        if row.first().map(|c| c.trim()) == Some(BENEVITY_TRAILER) {
            saw_trailer = true;
            break;
        }
        donor_rows.push(row.clone());
    }
    if !saw_trailer {
        warn!(
            "The report {:?} has no {:?} trailer row; every row after the labels was treated as donation data.",
            path, BENEVITY_TRAILER
        );
    }
    Ok(SourceTable::from_label_and_rows(labels, &donor_rows))
}

/// Resolves ids from the donor's first and last name columns.
pub fn resolve_ids(
    donor_data: &SourceTable,
    lgl: &LglApi,
    path: &str,
    ctx: &RunContext,
) -> BEtlResult<Vec<String>> {
    let first_col = donor_data
        .col(BEN_DONOR_FIRST_NAME)
        .context(MissingNameColumnSnafu { path })?;
    let last_col = donor_data
        .col(BEN_DONOR_LAST_NAME)
        .context(MissingNameColumnSnafu { path })?;
    let mut lgl_ids: Vec<String> = Vec::with_capacity(donor_data.len());
    for index in 0..donor_data.len() {
        let name = format!(
            "{} {}",
            donor_data.cell_at(index, first_col).trim(),
            donor_data.cell_at(index, last_col).trim()
        )
        .trim()
        .to_string();
        let cid = if name.is_empty() {
            ctx.notify(format!(
                "Row {} of the file {:?} has no donor name; no constituent lookup was made.",
                index + 1,
                path
            ));
            String::new()
        } else {
            lgl.find_constituent_id(&name, "", path, ctx)?
        };
        lgl_ids.push(cid);
    }
    Ok(lgl_ids)
}
