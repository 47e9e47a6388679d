use std::collections::BTreeMap;
use std::fs;

use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::etl::*;

pub const DEFAULT_SETTINGS_FILE: &str = "donor-etl.json";
pub const DEFAULT_API_BASE: &str = "https://api.littlegreenlight.com/api/v1";

/// Run settings, read once at startup.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// The CRM API access token.
    #[serde(rename = "apiToken")]
    pub api_token: String,
    /// Base URL of the CRM API. Only overridden in tests.
    #[serde(rename = "apiBase")]
    pub api_base: Option<String>,
    /// Maps a marker found in a gift description to the campaign the gift
    /// belongs to. Markers are compared case-insensitively as substrings.
    #[serde(rename = "campaigns", default)]
    pub campaigns: BTreeMap<String, String>,
}

impl Settings {
    pub fn api_base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    /// The campaign name for a gift description, if any marker matches.
    pub fn campaign_for(&self, description: &str) -> Option<&str> {
        let lower = description.to_lowercase();
        self.campaigns
            .iter()
            .find(|(marker, _)| lower.contains(&marker.to_lowercase()))
            .map(|(_, name)| name.as_str())
    }
}

pub fn read_settings(path: &str) -> BEtlResult<Settings> {
    let contents = fs::read_to_string(path).context(OpeningSettingsSnafu { path })?;
    let settings: Settings =
        serde_json::from_str(&contents).context(ParsingSettingsSnafu { path })?;
    debug!("read_settings: api base {:?}, {} campaign markers", settings.api_base(), settings.campaigns.len());
    Ok(settings)
}
