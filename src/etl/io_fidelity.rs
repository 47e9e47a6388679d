// Reader for Fidelity Charitable grant exports.
//
// Fidelity files are flat labeled grids: the first row is the labels and
// every later row is one grant, so unpacking is a straight copy. The work
// is in id resolution: the addressee name is sometimes blank and the
// giving-account name has to stand in for it.

use std::collections::HashMap;

use snafu::OptionExt;

use donor_records::{
    DonorTable, Field, FID_ACH_GROUP_ID, FID_ADDRESSEE_NAME, FID_GIVING_ACCOUNT_NAME, FID_GRANT_ID,
};

use crate::etl::*;

pub fn unpack(raw: &RawTable, path: &str) -> BEtlResult<SourceTable> {
    let labels = raw.rows.first().context(EmptyInputSnafu { path })?;
    Ok(SourceTable::from_label_and_rows(labels, &raw.rows[1..]))
}

/// Resolves every row to a constituent id by the addressee name, falling
/// back to the giving-account name when the addressee is blank. The
/// fallback name is written back into the table so it flows into the
/// output. Already-seen names reuse their id instead of a second API call.
pub fn resolve_ids(
    donor_data: &mut SourceTable,
    lgl: &LglApi,
    path: &str,
    ctx: &RunContext,
) -> BEtlResult<Vec<String>> {
    let name_col = donor_data
        .col(FID_ADDRESSEE_NAME)
        .context(MissingNameColumnSnafu { path })?;
    let account_col = donor_data.col(FID_GIVING_ACCOUNT_NAME);
    let mut lgl_ids: Vec<String> = Vec::with_capacity(donor_data.len());
    let mut names_found: HashMap<String, String> = HashMap::new();
    for index in 0..donor_data.len() {
        let mut name = donor_data.cell_at(index, name_col).to_string();
        if name.trim().is_empty() {
            if let Some(account_col) = account_col {
                let account_name = donor_data.cell_at(index, account_col).to_string();
                if !account_name.trim().is_empty() {
                    name = account_name;
                    // Carry the giving account name into the results.
                    donor_data.set_cell_at(index, name_col, name.clone());
                }
            }
        }
        let cid = if name.trim().is_empty() {
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

/// Fidelity grants arrive by ACH under one fixed campaign; the gift note
/// keeps the grant and ACH identifiers findable later.
pub fn finalize(donor_data: &SourceTable, output: &mut DonorTable) {
    output.ensure_column(Field::CampaignName);
    output.ensure_column(Field::PaymentType);
    output.ensure_column(Field::GiftNote);
    let grant_col = donor_data.col(FID_GRANT_ID);
    let ach_col = donor_data.col(FID_ACH_GROUP_ID);
    for (index, record) in output.records_mut().iter_mut().enumerate() {
        record.set(Field::CampaignName, "General");
        record.set(Field::PaymentType, "ACH (Automated Clearing House)");
        let grant = grant_col.map(|c| donor_data.cell_at(index, c)).unwrap_or("");
        let ach = ach_col.map(|c| donor_data.cell_at(index, c)).unwrap_or("");
        record.set(Field::GiftNote, format!("Grant ID # {}; ACH# {}", grant, ach));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::map_fields;
    use donor_records::FIDELITY_MAP;

    fn raw(rows: Vec<Vec<&str>>) -> RawTable {
        RawTable {
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn unpack_is_a_straight_copy_of_the_grid() {
        let table = raw(vec![
            vec!["Addressee Name", "Grant Id", "Grant Amount"],
            vec!["John Smith", "17309716", "10"],
            vec!["Jane Doe", "17319469", "20"],
        ]);
        let donor_data = unpack(&table, "f.xlsx").unwrap();
        assert_eq!(donor_data.len(), 2);
        assert_eq!(donor_data.cell(0, "Addressee Name"), "John Smith");
        assert_eq!(donor_data.cell(1, "Grant Id"), "17319469");
    }

    #[test]
    fn unpack_rejects_an_empty_file() {
        let err = unpack(&raw(vec![]), "f.xlsx").unwrap_err();
        assert!(matches!(*err, EtlError::EmptyInput { .. }));
    }

    #[test]
    fn finalize_sets_campaign_payment_and_gift_note() {
        let table = raw(vec![
            vec!["Addressee Name", "Grant Id", "ACH Group Id", "Grant Amount"],
            vec!["John Smith", "17309716", "A100", "10"],
        ]);
        let donor_data = unpack(&table, "f.xlsx").unwrap();
        let mut output = map_fields(&donor_data, &FIDELITY_MAP, vec!["7".to_string()]);
        finalize(&donor_data, &mut output);
        let record = &output.records()[0];
        assert_eq!(record.get(Field::CampaignName), "General");
        assert_eq!(record.get(Field::PaymentType), "ACH (Automated Clearing House)");
        assert_eq!(record.get(Field::GiftNote), "Grant ID # 17309716; ACH# A100");
    }
}
