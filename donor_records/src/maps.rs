//! Static column maps for each supported donor file source.
//!
//! A `FieldMap` translates one source's native column names into the
//! canonical schema. The maps double as the structural signature used to
//! recognize a file: a file belongs to a source when every one of its
//! (non-empty) column labels appears in that source's map. Because of that,
//! columns that carry no useful data still need an entry, marked `Ignore`.

use crate::Field;

/// What to do with one native column.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum MapTarget {
    /// Carry the column into the canonical schema under this field.
    To(Field),
    /// The column is recognized but not imported.
    Ignore,
}

use MapTarget::{Ignore, To};

/// An immutable mapping from a source's native column names to the
/// canonical schema. One per source, never mutated at runtime.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    /// Short human name of the source, used in logs and messages.
    pub source: &'static str,
    pub entries: &'static [(&'static str, MapTarget)],
}

impl FieldMap {
    pub fn target(&self, native: &str) -> Option<MapTarget> {
        self.entries
            .iter()
            .find(|(name, _)| *name == native)
            .map(|(_, t)| *t)
    }

    /// True when every non-empty label is known to this map. This is the
    /// superset test used by the format selector.
    pub fn covers<S: AsRef<str>>(&self, labels: &[S]) -> bool {
        let mut seen_any = false;
        for label in labels {
            let label = label.as_ref().trim();
            if label.is_empty() {
                continue;
            }
            seen_any = true;
            if self.target(label).is_none() {
                return false;
            }
        }
        seen_any
    }

    /// Labels of `labels` that this map does not know about.
    pub fn unknown_labels<'a, S: AsRef<str>>(&self, labels: &'a [S]) -> Vec<&'a str> {
        labels
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty() && self.target(l).is_none())
            .collect()
    }

    /// Map entries that were not present in `labels`.
    pub fn missing_labels<S: AsRef<str>>(&self, labels: &[S]) -> Vec<&'static str> {
        self.entries
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| !labels.iter().any(|l| l.as_ref().trim() == *name))
            .collect()
    }
}

// ---------------------------------------------------------------------
// Fidelity Charitable grant export (flat labeled grid).
// ---------------------------------------------------------------------

pub const FID_ADDRESSEE_NAME: &str = "Addressee Name";
pub const FID_GIVING_ACCOUNT_NAME: &str = "Giving Account Name";
pub const FID_GRANT_ID: &str = "Grant Id";
pub const FID_ACH_GROUP_ID: &str = "ACH Group Id";

pub static FIDELITY_MAP: FieldMap = FieldMap {
    source: "Fidelity",
    entries: &[
        (FID_ADDRESSEE_NAME, To(Field::FullName)),
        ("Acknowledgement Address Line 1", To(Field::AddressLine1)),
        ("Acknowledgement Address Line 2", To(Field::AddressLine2)),
        ("Acknowledgement Address Line 3", To(Field::AddressLine3)),
        ("Acknowledgement City", To(Field::City)),
        ("Acknowledgement Country", To(Field::Country)),
        ("Acknowledgement State", To(Field::State)),
        ("Acknowledgement ZipCode", To(Field::PostalCode)),
        (FID_GRANT_ID, To(Field::ExternalGiftId)),
        ("Effective Date", To(Field::GiftDate)),
        ("Grant Amount", To(Field::GiftAmount)),
        ("Special Purpose", To(Field::GiftNote)),
        ("Recommended By", Ignore),
        (FID_ACH_GROUP_ID, Ignore),
        ("Full Address", Ignore),
        (FID_GIVING_ACCOUNT_NAME, Ignore),
        ("Payable To", Ignore),
        ("Primary Name", Ignore),
        ("Secondary Name", Ignore),
    ],
};

// ---------------------------------------------------------------------
// Benevity donations report (CSV dump with a metadata preamble, the label
// row at a fixed offset and a "Totals" trailer).
// ---------------------------------------------------------------------

/// Zero-based index of the label row in a Benevity report.
pub const BENEVITY_LABEL_ROW: usize = 11;
/// First cell of the trailer row that ends the donation rows.
pub const BENEVITY_TRAILER: &str = "Totals";

pub const BEN_DONOR_FIRST_NAME: &str = "Donor First Name";
pub const BEN_DONOR_LAST_NAME: &str = "Donor Last Name";

pub static BENEVITY_MAP: FieldMap = FieldMap {
    source: "Benevity",
    entries: &[
        ("Address", To(Field::AddressLine1)),
        ("City", To(Field::City)),
        ("Comment", To(Field::GiftNote)),
        ("Company", To(Field::Employer)),
        ("Donation Date", To(Field::GiftDate)),
        (BEN_DONOR_FIRST_NAME, To(Field::FirstName)),
        (BEN_DONOR_LAST_NAME, To(Field::LastName)),
        ("Email", To(Field::Email)),
        ("Postal Code", To(Field::PostalCode)),
        ("State/Province", To(Field::State)),
        ("Total Donation to be Acknowledged", To(Field::GiftAmount)),
        ("Transaction ID", To(Field::ExternalGiftId)),
        ("Activity", Ignore),
        ("Cause Support Fee", Ignore),
        ("Currency", Ignore),
        ("Donation Frequency", Ignore),
        ("Fee Comment", Ignore),
        ("Match Amount", Ignore),
        ("Merchant Fee", Ignore),
        ("Project Remote ID", Ignore),
        ("Project", Ignore),
        ("Reason", Ignore),
        ("Source", Ignore),
    ],
};

// ---------------------------------------------------------------------
// Stripe charge export. Stripe packs the donor's postal address into a
// single comma-joined metadata column; the reader splits it into the
// synthetic columns below before mapping. Several columns exist in two
// spellings depending on which Stripe screen produced the export.
// ---------------------------------------------------------------------

pub const STRIPE_DESCRIPTION: &str = "Description";
pub const STRIPE_DESCRIPTION_2: &str = "description";
pub const STRIPE_SELLER_MESSAGE: &str = "Seller Message";
pub const STRIPE_STATUS: &str = "Status";
pub const STRIPE_STATUS_2: &str = "status";
pub const STRIPE_CUSTOMER_DESCRIPTION: &str = "Customer Description";
pub const STRIPE_CUSTOMER_DESCRIPTION_2: &str = "customer_description";
pub const STRIPE_CUSTOMER_EMAIL: &str = "Customer Email";
pub const STRIPE_CUSTOMER_EMAIL_2: &str = "customer_email";
pub const STRIPE_USER_FIRST_NAME_META: &str = "user_first_name (metadata)";
pub const STRIPE_USER_LAST_NAME_META: &str = "user_last_name (metadata)";
pub const STRIPE_MAILING_ADDRESS_META: &str = "mailing_address (metadata)";

/// Synthetic columns appended by the Stripe reader while unpacking.
pub const STRIPE_SYNTH_ADDRESS_1: &str = "Address line 1";
pub const STRIPE_SYNTH_ADDRESS_2: &str = "Address line 2";
pub const STRIPE_SYNTH_ADDRESS_3: &str = "Address line 3";
pub const STRIPE_SYNTH_CITY: &str = "City";
pub const STRIPE_SYNTH_STATE: &str = "State/province";
pub const STRIPE_SYNTH_POSTAL: &str = "Postal/ZIP code";
pub const STRIPE_SYNTH_PAYMENT_TYPE: &str = "Payment type";
pub const STRIPE_SYNTH_CAMPAIGN: &str = "Campaign name";

pub static STRIPE_MAP: FieldMap = FieldMap {
    source: "Stripe",
    entries: &[
        ("id", To(Field::ExternalGiftId)),
        (STRIPE_DESCRIPTION, To(Field::GiftNote)),
        (STRIPE_DESCRIPTION_2, To(Field::GiftNote)),
        ("Created (UTC)", To(Field::GiftDate)),
        ("Amount", To(Field::GiftAmount)),
        (STRIPE_CUSTOMER_DESCRIPTION, To(Field::FullName)),
        (STRIPE_CUSTOMER_DESCRIPTION_2, To(Field::FullName)),
        (STRIPE_CUSTOMER_EMAIL, To(Field::Email)),
        (STRIPE_CUSTOMER_EMAIL_2, To(Field::Email)),
        (STRIPE_USER_FIRST_NAME_META, To(Field::FirstName)),
        (STRIPE_USER_LAST_NAME_META, To(Field::LastName)),
        (STRIPE_SYNTH_ADDRESS_1, To(Field::AddressLine1)),
        (STRIPE_SYNTH_ADDRESS_2, To(Field::AddressLine2)),
        (STRIPE_SYNTH_ADDRESS_3, To(Field::AddressLine3)),
        (STRIPE_SYNTH_CITY, To(Field::City)),
        (STRIPE_SYNTH_STATE, To(Field::State)),
        (STRIPE_SYNTH_POSTAL, To(Field::PostalCode)),
        (STRIPE_SYNTH_PAYMENT_TYPE, To(Field::PaymentType)),
        (STRIPE_SYNTH_CAMPAIGN, To(Field::CampaignName)),
        (STRIPE_SELLER_MESSAGE, Ignore),
        ("seller_message", Ignore),
        (STRIPE_STATUS, Ignore),
        (STRIPE_STATUS_2, Ignore),
        (STRIPE_MAILING_ADDRESS_META, Ignore),
        ("Amount Refunded", Ignore),
        ("Currency", Ignore),
        ("Converted Amount", Ignore),
        ("Converted Amount Refunded", Ignore),
        ("Fee", Ignore),
        ("Tax", Ignore),
        ("Converted Currency", Ignore),
        ("Statement Descriptor", Ignore),
        ("Customer ID", Ignore),
        ("Captured", Ignore),
        ("Card ID", Ignore),
        ("Invoice ID", Ignore),
        ("Transfer", Ignore),
        ("amount (metadata)", Ignore),
        ("app_version (metadata)", Ignore),
        ("device (metadata)", Ignore),
        ("from_app (metadata)", Ignore),
        ("id (metadata)", Ignore),
        ("ios_version (metadata)", Ignore),
        ("location (metadata)", Ignore),
        ("tax (metadata)", Ignore),
        ("terminal (metadata)", Ignore),
        ("user_id (metadata)", Ignore),
        ("user_email (metadata)", Ignore),
        ("postal_code (metadata)", Ignore),
        ("country (metadata)", Ignore),
        ("widget_url (metadata)", Ignore),
        ("client_application_name (metadata)", Ignore),
        ("payment_platform_account_uuid (metadata)", Ignore),
        ("gl_charge_id (metadata)", Ignore),
        ("npo_guidestar_id (metadata)", Ignore),
        ("nonprofit_id (metadata)", Ignore),
        ("gl_txn_0 (metadata)", Ignore),
        ("transaction_fee_covered_by_donor (metadata)", Ignore),
        ("zip_code (metadata)", Ignore),
        ("referrer_url (metadata)", Ignore),
        ("phone_ref (metadata)", Ignore),
        ("ref_id (metadata)", Ignore),
        ("text_campaign_code (metadata)", Ignore),
        ("ref (metadata)", Ignore),
        ("campaign_slug (metadata)", Ignore),
        ("campaign_internal_name (metadata)", Ignore),
        ("campaign_id (metadata)", Ignore),
        ("authorize_only (metadata)", Ignore),
        ("input_source (metadata)", Ignore),
        ("device_model (metadata)", Ignore),
        ("reader_used (metadata)", Ignore),
        ("device_os (metadata)", Ignore),
        ("ein (metadata)", Ignore),
        ("email (metadata)", Ignore),
        ("source (metadata)", Ignore),
        ("roundupChargeType (metadata)", Ignore),
        ("page_type (metadata)", Ignore),
        ("user_type (metadata)", Ignore),
        ("why_did_you_choose_to_put_your_donat... (metadata)", Ignore),
        ("anonymous_to_public (metadata)", Ignore),
    ],
};

// ---------------------------------------------------------------------
// YourCause / Blackbaud payments export (ledger-style CSV; only rows whose
// payment status is exactly "Cleared" are kept).
// ---------------------------------------------------------------------

pub const YC_PAYMENT_STATUS: &str = "PaymentStatus";
pub const YC_CLEARED: &str = "Cleared";
pub const YC_PROCESSING_PARTNER_NAME: &str = "ProcessingPartnerName";
pub const YC_PAYMENT_NUMBER: &str = "PaymentNumber";

pub static YOURCAUSE_MAP: FieldMap = FieldMap {
    source: "YourCause",
    entries: &[
        ("Id", To(Field::ExternalGiftId)),
        ("Amount", To(Field::GiftAmount)),
        ("DateCreated", To(Field::GiftDate)),
        ("PaymentType Name", To(Field::PaymentType)),
        (YC_PROCESSING_PARTNER_NAME, To(Field::FullName)),
        ("GrossAmount", Ignore),
        ("CheckFeeDetails CheckFee", Ignore),
        ("CheckFeeDetails PercentWithheld", Ignore),
        ("CheckFeeDetails CapApplied", Ignore),
        ("Currency", Ignore),
        ("IsAch", Ignore),
        (YC_PAYMENT_NUMBER, Ignore),
        (YC_PAYMENT_STATUS, Ignore),
        ("PaymentStatusDate", Ignore),
        ("ExternalSystemTypeName", Ignore),
        ("PaymentSubStatus", Ignore),
        ("CheckReissueRequestedDate", Ignore),
        ("HasCheckReissueRequest", Ignore),
        ("CheckReissueStatusId", Ignore),
        ("CheckReissueStatusDate", Ignore),
        ("CheckReissueRejectionReasonId", Ignore),
        ("CheckReissueRejectionReason", Ignore),
        ("CheckReissueRejectionComment", Ignore),
        ("IsEligibleForCheckReissueRequest", Ignore),
        ("PaymentType Id", Ignore),
        ("PaymentType Description", Ignore),
        ("ReissuePaymentId", Ignore),
        ("ReissuePaymentNumber", Ignore),
        ("ProcessingPartnerName Id", Ignore),
    ],
};

// ---------------------------------------------------------------------
// QuickBooks deposit-detail export. Column identity is positional: the
// reader locates the label row and addresses cells by the positions of
// these labels, then emits rows under the same names.
// ---------------------------------------------------------------------

pub const QB_DATE: &str = "Date";
pub const QB_TRANSACTION_TYPE: &str = "Transaction Type";
pub const QB_NUM: &str = "Num";
pub const QB_DONOR: &str = "Donor";
pub const QB_VENDOR: &str = "Vendor";
pub const QB_MEMO: &str = "Memo/Description";
pub const QB_CLR: &str = "Clr";
pub const QB_AMOUNT: &str = "Amount";

pub static QUICKBOOKS_MAP: FieldMap = FieldMap {
    source: "QuickBooks",
    entries: &[
        (QB_DATE, To(Field::GiftDate)),
        (QB_DONOR, To(Field::FullName)),
        (QB_MEMO, To(Field::GiftNote)),
        (QB_AMOUNT, To(Field::GiftAmount)),
        (QB_TRANSACTION_TYPE, Ignore),
        (QB_NUM, Ignore),
        (QB_VENDOR, Ignore),
        (QB_CLR, Ignore),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_is_a_superset_test() {
        let labels = vec!["Addressee Name", "Grant Id", "Effective Date"];
        assert!(FIDELITY_MAP.covers(&labels));
        let labels = vec!["Addressee Name", "Some Unknown Column"];
        assert!(!FIDELITY_MAP.covers(&labels));
    }

    #[test]
    fn covers_ignores_empty_labels_but_needs_at_least_one() {
        assert!(FIDELITY_MAP.covers(&["", "Grant Id", ""]));
        let empty: Vec<&str> = vec![];
        assert!(!FIDELITY_MAP.covers(&empty));
        assert!(!FIDELITY_MAP.covers(&["", ""]));
    }

    #[test]
    fn no_source_map_covers_another_sources_labels() {
        // The selector relies on the real-world column sets being
        // mutually non-covering.
        let fidelity: Vec<&str> = FIDELITY_MAP.entries.iter().map(|(n, _)| *n).collect();
        let benevity: Vec<&str> = BENEVITY_MAP.entries.iter().map(|(n, _)| *n).collect();
        let yourcause: Vec<&str> = YOURCAUSE_MAP.entries.iter().map(|(n, _)| *n).collect();
        assert!(!BENEVITY_MAP.covers(&fidelity));
        assert!(!FIDELITY_MAP.covers(&benevity));
        assert!(!STRIPE_MAP.covers(&yourcause));
        assert!(!YOURCAUSE_MAP.covers(&benevity));
    }

    #[test]
    fn unknown_and_missing_labels_report_both_directions() {
        let labels = vec!["Grant Id", "Mystery"];
        assert_eq!(FIDELITY_MAP.unknown_labels(&labels), vec!["Mystery"]);
        assert!(FIDELITY_MAP
            .missing_labels(&labels)
            .contains(&"Addressee Name"));
        assert!(!FIDELITY_MAP.missing_labels(&labels).contains(&"Grant Id"));
    }
}
