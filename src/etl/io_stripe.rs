// Reader for Stripe charge exports.
//
// Stripe rows need the most cleanup of any source: failed and refunded
// charges are dropped, the free-text description is blanked unless it
// carries one of the recognized markers, "RoundUp:" descriptions donate
// their trailing "First Last" name to the donor fields, and the one-field
// comma-joined mailing address is split into discrete address columns.

use std::collections::HashMap;

use log::debug;
use snafu::OptionExt;

use donor_records::{
    split_packed_address, AddressSplit, DonorTable, Field, STRIPE_CUSTOMER_DESCRIPTION,
    STRIPE_CUSTOMER_DESCRIPTION_2, STRIPE_CUSTOMER_EMAIL, STRIPE_CUSTOMER_EMAIL_2,
    STRIPE_DESCRIPTION, STRIPE_DESCRIPTION_2, STRIPE_MAILING_ADDRESS_META, STRIPE_SELLER_MESSAGE,
    STRIPE_STATUS, STRIPE_STATUS_2, STRIPE_SYNTH_ADDRESS_1, STRIPE_SYNTH_ADDRESS_2,
    STRIPE_SYNTH_ADDRESS_3, STRIPE_SYNTH_CAMPAIGN, STRIPE_SYNTH_CITY, STRIPE_SYNTH_PAYMENT_TYPE,
    STRIPE_SYNTH_POSTAL, STRIPE_SYNTH_STATE, STRIPE_USER_FIRST_NAME_META,
    STRIPE_USER_LAST_NAME_META,
};

use crate::etl::lgl::is_usable_email;
use crate::etl::*;

/// Markers that make a description worth keeping as the gift note.
const DESC_MEMORY: &str = "in memory of";
const DESC_HONOR: &str = "in honor of";
const DESC_ROUNDUP: &str = "roundup:";

const SYNTH_COLUMNS: [&str; 8] = [
    STRIPE_SYNTH_ADDRESS_1,
    STRIPE_SYNTH_ADDRESS_2,
    STRIPE_SYNTH_ADDRESS_3,
    STRIPE_SYNTH_CITY,
    STRIPE_SYNTH_STATE,
    STRIPE_SYNTH_POSTAL,
    STRIPE_SYNTH_PAYMENT_TYPE,
    STRIPE_SYNTH_CAMPAIGN,
];

/// Culls and cleans the charge rows: drops failed/refunded charges, labels
/// the payment type, translates the description into a campaign, cleans
/// the description and splits the packed mailing address.
pub fn unpack(
    raw: &RawTable,
    settings: &Settings,
    path: &str,
    ctx: &RunContext,
) -> BEtlResult<SourceTable> {
    let labels = raw.rows.first().context(EmptyInputSnafu { path })?;
    let mut donor_data = SourceTable::from_label_and_rows(labels, &[]);
    for synth in SYNTH_COLUMNS {
        donor_data.add_column(synth);
    }
    let status_col = donor_data.col2(STRIPE_STATUS, STRIPE_STATUS_2);
    for row in &raw.rows[1..] {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        if let Some(status_col) = status_col {
            let status = row
                .get(status_col)
                .map(|s| s.trim().to_lowercase())
                .unwrap_or_default();
            if status == "failed" || status == "refunded" {
                debug!("Skipping a {} charge.", status);
                continue;
            }
        }
        donor_data.push_row(row.clone());
        let index = donor_data.len() - 1;
        donor_data.set_cell(index, STRIPE_SYNTH_PAYMENT_TYPE, "Credit Card Stripe");
        update_description(&mut donor_data, index, settings);
        update_address(&mut donor_data, index, path, ctx);
    }
    Ok(donor_data)
}

// Applies the description rules to one row:
// - the campaign translation table is consulted while the full text is
//   still available;
// - the description is blanked unless it contains "In Memory of",
//   "In Honor of" or "RoundUp:";
// - a "RoundUp:" description carries a trailing "First Last" name that is
//   copied into the donor name fields (it overrides the name used for id
//   resolution);
// - a seller message other than "Payment complete." is appended so failed
//   captures stay visible in the note.
fn update_description(donor_data: &mut SourceTable, index: usize, settings: &Settings) {
    let desc_col = match donor_data.col2(STRIPE_DESCRIPTION, STRIPE_DESCRIPTION_2) {
        Some(c) => c,
        None => return,
    };
    let desc = donor_data.cell_at(index, desc_col).to_string();
    let lower = desc.to_lowercase();

    if let Some(campaign) = settings.campaign_for(&desc) {
        let campaign = campaign.to_string();
        donor_data.set_cell(index, STRIPE_SYNTH_CAMPAIGN, campaign);
    }

    if let Some(pos) = lower.find(DESC_ROUNDUP) {
        let trailing = desc.get(pos + DESC_ROUNDUP.len()..).unwrap_or("").trim();
        let mut parts = trailing.split_whitespace();
        if let (Some(first), Some(last)) = (parts.next(), parts.next()) {
            let (first, last) = (first.to_string(), last.to_string());
            donor_data.set_cell(index, STRIPE_USER_FIRST_NAME_META, first);
            donor_data.set_cell(index, STRIPE_USER_LAST_NAME_META, last);
        }
    }

    let keep = lower.contains(DESC_MEMORY)
        || lower.contains(DESC_HONOR)
        || lower.contains(DESC_ROUNDUP);
    let mut note = if keep { desc } else { String::new() };

    let seller = donor_data
        .col2(STRIPE_SELLER_MESSAGE, "seller_message")
        .map(|c| donor_data.cell_at(index, c).trim().to_string())
        .unwrap_or_default();
    if !seller.is_empty() && !seller.eq_ignore_ascii_case("Payment complete.") {
        if note.is_empty() {
            note = seller;
        } else {
            note = format!("{}; {}", note, seller);
        }
    }
    donor_data.set_cell_at(index, desc_col, note);
}

// Splits the packed mailing address of one row into the synthetic address
// columns. A malformed address is reported and left blank; the row itself
// is kept.
fn update_address(donor_data: &mut SourceTable, index: usize, path: &str, ctx: &RunContext) {
    let packed = donor_data
        .col(STRIPE_MAILING_ADDRESS_META)
        .map(|c| donor_data.cell_at(index, c).to_string())
        .unwrap_or_default();
    match split_packed_address(&packed) {
        AddressSplit::NoAddress => {}
        AddressSplit::BadSegmentCount(n) => {
            ctx.notify_error(format!(
                "Row {} of the file {:?} has a mailing address with {} comma-separated \
                 segments (4 to 6 were expected): {:?}. The address was left blank.",
                index + 1,
                path,
                n,
                packed
            ));
        }
        AddressSplit::Split(address) => {
            donor_data.set_cell(index, STRIPE_SYNTH_ADDRESS_1, address.line1);
            donor_data.set_cell(index, STRIPE_SYNTH_ADDRESS_2, address.line2);
            donor_data.set_cell(index, STRIPE_SYNTH_ADDRESS_3, address.line3);
            donor_data.set_cell(index, STRIPE_SYNTH_CITY, address.city);
            donor_data.set_cell(index, STRIPE_SYNTH_STATE, address.state);
            donor_data.set_cell(index, STRIPE_SYNTH_POSTAL, address.postal);
        }
    }
}

/// Resolves ids by the customer description (the donor's name), falling
/// back to the RoundUp first/last name fields, with the email as the
/// higher-confidence key when present. Lookups are memoized under
/// whichever key was used.
pub fn resolve_ids(
    donor_data: &SourceTable,
    lgl: &LglApi,
    path: &str,
    ctx: &RunContext,
) -> BEtlResult<Vec<String>> {
    let desc_col =
        donor_data.col2(STRIPE_CUSTOMER_DESCRIPTION, STRIPE_CUSTOMER_DESCRIPTION_2);
    let email_col = donor_data.col2(STRIPE_CUSTOMER_EMAIL, STRIPE_CUSTOMER_EMAIL_2);
    let first_col = donor_data.col(STRIPE_USER_FIRST_NAME_META);
    let last_col = donor_data.col(STRIPE_USER_LAST_NAME_META);
    if desc_col.is_none() && first_col.is_none() {
        return Err(Box::new(EtlError::MissingNameColumn {
            path: path.to_string(),
        }));
    }
    let mut lgl_ids: Vec<String> = Vec::with_capacity(donor_data.len());
    let mut ids_found: HashMap<String, String> = HashMap::new();
    for index in 0..donor_data.len() {
        let mut name = desc_col
            .map(|c| donor_data.cell_at(index, c).trim().to_string())
            .unwrap_or_default();
        let email = email_col
            .map(|c| donor_data.cell_at(index, c).trim().to_string())
            .unwrap_or_default();
        if name.is_empty() {
            let first = first_col
                .map(|c| donor_data.cell_at(index, c).trim().to_string())
                .unwrap_or_default();
            if first.chars().count() > 1 {
                let last = last_col
                    .map(|c| donor_data.cell_at(index, c).trim().to_string())
                    .unwrap_or_default();
                name = format!("{} {}", first, last).trim().to_string();
            }
        }
        let mut cid = String::new();
        if !name.is_empty() || is_usable_email(&email) {
            if let Some(known) = ids_found.get(&name).filter(|_| !name.is_empty()) {
                cid = known.clone();
            } else if let Some(known) = ids_found.get(&email).filter(|_| !email.is_empty()) {
                cid = known.clone();
            } else {
                cid = lgl.find_constituent_id(&name, &email, path, ctx)?;
                if !name.is_empty() {
                    ids_found.insert(name.clone(), cid.clone());
                } else {
                    ids_found.insert(email.clone(), cid.clone());
                }
            }
        } else {
            ctx.notify(format!(
                "Row {} of the file {:?} has neither a donor name nor an email; \
                 no constituent lookup was made.",
                index + 1,
                path
            ));
        }
        lgl_ids.push(cid);
    }
    Ok(lgl_ids)
}

/// Gifts whose description matched no campaign marker land in the default
/// campaign.
pub fn finalize(output: &mut DonorTable) {
    output.ensure_column(Field::CampaignName);
    for record in output.records_mut() {
        if record.is_blank(Field::CampaignName) {
            record.set(Field::CampaignName, "General");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::map_fields;
    use donor_records::STRIPE_MAP;
    use std::collections::BTreeMap;

    fn settings() -> Settings {
        let mut campaigns = BTreeMap::new();
        campaigns.insert("giving tuesday".to_string(), "Giving Tuesday 2022".to_string());
        Settings {
            api_token: "t".to_string(),
            api_base: None,
            campaigns,
        }
    }

    fn stripe_raw(data_rows: Vec<Vec<&str>>) -> RawTable {
        let mut rows = vec![vec![
            "id".to_string(),
            "Description".to_string(),
            "Seller Message".to_string(),
            "Created (UTC)".to_string(),
            "Amount".to_string(),
            "Status".to_string(),
            "Customer Description".to_string(),
            "Customer Email".to_string(),
            "user_first_name (metadata)".to_string(),
            "user_last_name (metadata)".to_string(),
            "mailing_address (metadata)".to_string(),
        ]];
        for row in data_rows {
            rows.push(row.into_iter().map(|c| c.to_string()).collect());
        }
        RawTable { rows }
    }

    fn ctx() -> RunContext {
        RunContext::new()
    }

    #[test]
    fn unpack_drops_failed_and_refunded_charges() {
        let table = stripe_raw(vec![
            vec!["ch_1", "", "Payment complete.", "12/31/2022 23:59", "25", "Paid", "Jane Doe", "j@d.org", "", "", ""],
            vec!["ch_2", "", "", "12/31/2022 23:59", "25", "Failed", "A B", "", "", "", ""],
            vec!["ch_3", "", "", "12/31/2022 23:59", "25", "Refunded", "C D", "", "", "", ""],
        ]);
        let donor_data = unpack(&table, &settings(), "s.csv", &ctx()).unwrap();
        assert_eq!(donor_data.len(), 1);
        assert_eq!(donor_data.cell(0, "Customer Description"), "Jane Doe");
        assert_eq!(donor_data.cell(0, STRIPE_SYNTH_PAYMENT_TYPE), "Credit Card Stripe");
    }

    #[test]
    fn unpack_splits_a_five_segment_mailing_address() {
        let table = stripe_raw(vec![vec![
            "ch_1", "", "Payment complete.", "12/31/2022 23:59", "25", "Paid",
            "Jane Doe", "j@d.org", "", "",
            "123 Main St, Apt 4, Boston, MA, 02115",
        ]]);
        let donor_data = unpack(&table, &settings(), "s.csv", &ctx()).unwrap();
        assert_eq!(donor_data.cell(0, STRIPE_SYNTH_ADDRESS_1), "123 Main St");
        assert_eq!(donor_data.cell(0, STRIPE_SYNTH_ADDRESS_2), "Apt 4");
        assert_eq!(donor_data.cell(0, STRIPE_SYNTH_CITY), "Boston");
        assert_eq!(donor_data.cell(0, STRIPE_SYNTH_STATE), "MA");
        assert_eq!(donor_data.cell(0, STRIPE_SYNTH_POSTAL), "02115");
    }

    #[test]
    fn unpack_reports_a_malformed_address_and_keeps_the_row() {
        let table = stripe_raw(vec![vec![
            "ch_1", "", "", "12/31/2022 23:59", "25", "Paid", "Jane Doe", "", "", "",
            "Boston, MA, 02115",
        ]]);
        let run_ctx = ctx();
        let donor_data = unpack(&table, &settings(), "s.csv", &run_ctx).unwrap();
        assert_eq!(donor_data.len(), 1);
        assert_eq!(donor_data.cell(0, STRIPE_SYNTH_ADDRESS_1), "");
        assert!(!run_ctx.messages.borrow().is_empty());
    }

    #[test]
    fn unpack_blanks_descriptions_without_markers() {
        let table = stripe_raw(vec![
            vec!["ch_1", "Give Lively / Smart Donations", "Payment complete.", "", "25", "Paid", "Jane Doe", "", "", "", ""],
            vec!["ch_2", "In Memory of Alice Smith", "Payment complete.", "", "25", "Paid", "Jane Doe", "", "", "", ""],
        ]);
        let donor_data = unpack(&table, &settings(), "s.csv", &ctx()).unwrap();
        assert_eq!(donor_data.cell(0, "Description"), "");
        assert_eq!(donor_data.cell(1, "Description"), "In Memory of Alice Smith");
    }

    #[test]
    fn unpack_copies_the_roundup_name_into_the_donor_fields() {
        let table = stripe_raw(vec![vec![
            "ch_1", "RoundUp: Pat Jones", "Payment complete.", "", "3.63", "Paid",
            "", "", "", "", "",
        ]]);
        let donor_data = unpack(&table, &settings(), "s.csv", &ctx()).unwrap();
        assert_eq!(donor_data.cell(0, STRIPE_USER_FIRST_NAME_META), "Pat");
        assert_eq!(donor_data.cell(0, STRIPE_USER_LAST_NAME_META), "Jones");
        // The description keeps the marker text.
        assert_eq!(donor_data.cell(0, "Description"), "RoundUp: Pat Jones");
    }

    #[test]
    fn unpack_appends_an_unusual_seller_message() {
        let table = stripe_raw(vec![vec![
            "ch_1", "Give Lively", "Card declined, retried.", "", "25", "Paid",
            "Jane Doe", "", "", "", "",
        ]]);
        let donor_data = unpack(&table, &settings(), "s.csv", &ctx()).unwrap();
        assert_eq!(donor_data.cell(0, "Description"), "Card declined, retried.");
    }

    #[test]
    fn unpack_translates_descriptions_into_campaigns() {
        let table = stripe_raw(vec![vec![
            "ch_1", "Giving Tuesday appeal", "Payment complete.", "", "25", "Paid",
            "Jane Doe", "", "", "", "",
        ]]);
        let donor_data = unpack(&table, &settings(), "s.csv", &ctx()).unwrap();
        assert_eq!(donor_data.cell(0, STRIPE_SYNTH_CAMPAIGN), "Giving Tuesday 2022");
    }

    #[test]
    fn finalize_defaults_the_campaign_to_general() {
        let table = stripe_raw(vec![
            vec!["ch_1", "Giving Tuesday appeal", "", "", "25", "Paid", "Jane Doe", "", "", "", ""],
            vec!["ch_2", "", "", "", "10", "Paid", "John Roe", "", "", "", ""],
        ]);
        let donor_data = unpack(&table, &settings(), "s.csv", &ctx()).unwrap();
        let mut output = map_fields(&donor_data, &STRIPE_MAP, vec![String::new(), String::new()]);
        finalize(&mut output);
        assert_eq!(output.records()[0].get(Field::CampaignName), "Giving Tuesday 2022");
        assert_eq!(output.records()[1].get(Field::CampaignName), "General");
    }
}
