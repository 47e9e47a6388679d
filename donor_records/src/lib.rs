//! Canonical donor-record model shared by all the donor file readers.
//!
//! Every third-party export (Fidelity, Benevity, Stripe, YourCause,
//! QuickBooks) is unpacked into its own native table shape and then mapped
//! into the single schema defined here. The containers in this crate are
//! purely in-memory: all file and network I/O lives in the `donor-etl`
//! binary crate.

mod maps;
mod normalize;

pub use crate::maps::*;
pub use crate::normalize::*;

/// The canonical schema. One variant per column of the import file.
///
/// The order of `ALL` is the column order of the written import file, so new
/// fields should be appended with care.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum Field {
    ConstituentId,
    FullName,
    FirstName,
    LastName,
    Email,
    AddressLine1,
    AddressLine2,
    AddressLine3,
    City,
    State,
    PostalCode,
    Country,
    Employer,
    GiftDate,
    GiftAmount,
    GiftNote,
    ExternalGiftId,
    CampaignName,
    PaymentType,
}

pub const FIELD_COUNT: usize = 19;

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::ConstituentId,
        Field::FullName,
        Field::FirstName,
        Field::LastName,
        Field::Email,
        Field::AddressLine1,
        Field::AddressLine2,
        Field::AddressLine3,
        Field::City,
        Field::State,
        Field::PostalCode,
        Field::Country,
        Field::Employer,
        Field::GiftDate,
        Field::GiftAmount,
        Field::GiftNote,
        Field::ExternalGiftId,
        Field::CampaignName,
        Field::PaymentType,
    ];

    /// The column header used by the CRM import screen.
    pub fn column_name(self) -> &'static str {
        match self {
            Field::ConstituentId => "LGL Constituent ID",
            Field::FullName => "Full Name",
            Field::FirstName => "First name",
            Field::LastName => "Last name",
            Field::Email => "Email address",
            Field::AddressLine1 => "Address line 1",
            Field::AddressLine2 => "Address line 2",
            Field::AddressLine3 => "Address line 3",
            Field::City => "City",
            Field::State => "State/province",
            Field::PostalCode => "Postal/ZIP code",
            Field::Country => "Country",
            Field::Employer => "Employer/Organization",
            Field::GiftDate => "Gift date",
            Field::GiftAmount => "Gift amount",
            Field::GiftNote => "Gift note",
            Field::ExternalGiftId => "External gift ID",
            Field::CampaignName => "Campaign name",
            Field::PaymentType => "Payment type",
        }
    }

    fn idx(self) -> usize {
        self as usize
    }
}

/// One donation row in the canonical schema.
///
/// Every field of the schema is present on every record; an empty string
/// means "no data". This makes rows from very different sources coexist in
/// one table without any per-row column bookkeeping.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct DonorRecord {
    values: [String; FIELD_COUNT],
}

impl Default for DonorRecord {
    fn default() -> Self {
        DonorRecord {
            values: core::array::from_fn(|_| String::new()),
        }
    }
}

impl DonorRecord {
    pub fn new() -> DonorRecord {
        DonorRecord::default()
    }

    pub fn get(&self, field: Field) -> &str {
        &self.values[field.idx()]
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.values[field.idx()] = value.into();
    }

    pub fn is_blank(&self, field: Field) -> bool {
        self.values[field.idx()].trim().is_empty()
    }
}

/// An ordered collection of canonical records plus the set of columns that
/// the contributing sources actually populated.
///
/// Indexes are stable merge keys: rows are only ever appended, never
/// resorted, so a row keeps its position across the merge of several input
/// files.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct DonorTable {
    records: Vec<DonorRecord>,
    columns: Vec<Field>,
}

impl DonorTable {
    pub fn new() -> DonorTable {
        DonorTable::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DonorRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [DonorRecord] {
        &mut self.records
    }

    /// Columns populated by at least one contributing source, in first-seen
    /// order.
    pub fn columns(&self) -> &[Field] {
        &self.columns
    }

    pub fn has_column(&self, field: Field) -> bool {
        self.columns.contains(&field)
    }

    /// Registers a column without touching any record. Rows keep their
    /// empty-string placeholder for it until something fills them in.
    pub fn ensure_column(&mut self, field: Field) {
        if !self.columns.contains(&field) {
            self.columns.push(field);
        }
    }

    pub fn push(&mut self, record: DonorRecord) {
        self.records.push(record);
    }

    /// Merges `other` into this table.
    ///
    /// The first append into an empty table adopts the incoming table
    /// wholesale. Afterwards the column set becomes the union of both
    /// sides: rows contributed by a file that never had a given column keep
    /// an empty string there, so the table stays rectangular after every
    /// append.
    pub fn append(&mut self, other: DonorTable) {
        if self.records.is_empty() && self.columns.is_empty() {
            *self = other;
            return;
        }
        for col in other.columns {
            self.ensure_column(col);
        }
        self.records.extend(other.records);
    }
}
