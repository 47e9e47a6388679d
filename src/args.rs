use clap::Parser;

/// Reformats donor spreadsheets from third-party giving platforms into a
/// Little Green Light import file.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, repeatable) A donor export file to process. The source
    /// (Fidelity, Benevity, Stripe, YourCause, QuickBooks) is recognized
    /// automatically from the column labels; no flag is needed.
    #[clap(short, long, value_parser)]
    pub input: Vec<String>,

    /// (file path) Where the import file is written. Defaults to "lgl.csv".
    #[clap(short, long, value_parser)]
    pub output: Option<String>,

    /// (file path or empty) If specified, every resolved donor's name,
    /// email and address are checked against the CRM record and any
    /// differences are appended to this file.
    #[clap(long, value_parser)]
    pub variance_file: Option<String>,

    /// (file path) The settings file holding the API token, the API base
    /// URL and the gift-description-to-campaign table. Defaults to
    /// "donor-etl.json" in the working directory.
    #[clap(short, long, value_parser)]
    pub settings: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
