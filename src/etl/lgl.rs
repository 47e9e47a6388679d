// Client for the Little Green Light (LGL) constituent API.
//
// LGL static API doc: https://api.littlegreenlight.com/api-docs/static.html
// Every call is paced through the shared `RateLimiter`: LGL enforces a hard
// quota of 300 calls per 5 minutes and answers HTTP 429 past it, which can
// escalate into a longer lockout.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info};
use serde::Deserialize;
use snafu::prelude::*;

use donor_records::search_candidates;

use crate::etl::config_reader::Settings;
use crate::etl::*;

/// The provider quota minus a safety margin.
pub const CALL_THRESHOLD: usize = 299;
/// The provider's reset window, with a small margin on top.
pub const WAIT_PERIOD_SECS: u64 = 305;

/// Paces outbound API calls. One instance is shared for the whole run (via
/// `RunContext`) so every client throttles against the same budget.
///
/// This is a sliding window approximated by a fixed-size lookback: when the
/// counter passes the threshold, the elapsed time between the current call
/// and the call `threshold` calls ago decides whether to sleep. That is
/// coarser than a precise rolling window but it only needs to stay under
/// the provider's hard block.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    times: Vec<u64>,
    call_count: usize,
    threshold: usize,
    wait_period: u64,
}

impl RateLimiter {
    pub fn new() -> RateLimiter {
        RateLimiter::with_limits(CALL_THRESHOLD, WAIT_PERIOD_SECS)
    }

    pub fn with_limits(threshold: usize, wait_period: u64) -> RateLimiter {
        RateLimiter {
            times: Vec::new(),
            call_count: 0,
            threshold,
            wait_period,
        }
    }

    /// Records one outbound call, sleeping first if the window is full.
    pub fn record_call(&mut self) {
        if let Some(wait) = self.check_in(unix_now()) {
            info!(
                "More than {} calls have been made to the CRM in the last {} seconds. \
                 Exceeding the allowed call rate would cause an error, so there will be \
                 a {} second delay before the program resumes.",
                self.threshold,
                self.wait_period,
                wait.as_secs()
            );
            thread::sleep(wait);
            info!("The program is resuming now.");
        }
    }

    /// Appends a call timestamp and returns the sleep needed to stay under
    /// the quota, if any. The counter resets once a sleep is requested.
    pub fn check_in(&mut self, now: u64) -> Option<Duration> {
        self.times.push(now);
        self.call_count += 1;
        debug!("The call count is {}.", self.call_count);
        if self.call_count > self.threshold {
            let current = self.times.len() - 1;
            let first = current.saturating_sub(self.threshold);
            let elapsed = self.times[current].saturating_sub(self.times[first]);
            if elapsed < self.wait_period {
                self.call_count = 0;
                return Some(Duration::from_secs(self.wait_period - elapsed));
            }
        }
        None
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One entry of a constituent search result.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstituentSummary {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub addressee: Option<String>,
}

impl ConstituentSummary {
    pub fn display_name(&self) -> String {
        if let Some(addressee) = &self.addressee {
            if !addressee.trim().is_empty() {
                return addressee.trim().to_string();
            }
        }
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreetAddress {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub is_preferred: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub is_preferred: bool,
}

/// The detail record for one constituent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConstituentDetail {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub street_addresses: Vec<StreetAddress>,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
}

impl ConstituentDetail {
    /// The address the CRM treats as the constituent's primary one.
    pub fn preferred_address(&self) -> Option<&StreetAddress> {
        self.street_addresses
            .iter()
            .find(|a| a.is_preferred)
            .or_else(|| self.street_addresses.first())
    }

    pub fn preferred_email(&self) -> Option<&EmailAddress> {
        self.email_addresses
            .iter()
            .find(|e| e.is_preferred)
            .or_else(|| self.email_addresses.first())
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// One prior donation, from the gifts endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Donation {
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub date: String,
}

/// What a search ultimately produced for one donor.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum MatchOutcome {
    NoMatch,
    One(String),
    /// More than one record matched. The donor must be matched by hand;
    /// picking one automatically in a donor-record system is worse than
    /// picking none.
    Ambiguous(Vec<String>),
}

/// Classifies a search result. Never picks between multiple matches.
pub fn classify_matches(items: &[ConstituentSummary]) -> MatchOutcome {
    match items {
        [] => MatchOutcome::NoMatch,
        [single] => MatchOutcome::One(single.id.to_string()),
        many => MatchOutcome::Ambiguous(
            many.iter()
                .map(|c| format!("{} ({})", c.display_name(), c.id))
                .collect(),
        ),
    }
}

pub fn is_usable_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email.contains('@')
}

/// Blocking client for the LGL API. Cheap to construct; all instances share
/// the run's rate limiter through the `RunContext` passed to each call.
pub struct LglApi {
    http: reqwest::blocking::Client,
    api_base: String,
    token: String,
}

impl LglApi {
    pub fn new(settings: &Settings) -> BEtlResult<LglApi> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("donor-etl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .context(HttpClientSnafu {})?;
        Ok(LglApi {
            http,
            api_base: settings.api_base().to_string(),
            token: settings.api_token.clone(),
        })
    }

    /// Searches for a constituent. An email search runs first when a usable
    /// email is present (an email hit is higher-confidence and cheaper on
    /// ambiguity); otherwise the name is queried through the progressive
    /// relaxation ladder, stopping at the first query with results.
    pub fn find_constituent(
        &self,
        name: &str,
        email: &str,
        ctx: &RunContext,
    ) -> BEtlResult<Vec<ConstituentSummary>> {
        if is_usable_email(email) {
            let items = self.search(&format!("eaddr={}", email.trim()), ctx)?;
            if !items.is_empty() {
                debug!("find_constituent: matched {:?} by email", email);
                return Ok(items);
            }
        }
        if name.trim().is_empty() {
            return Ok(Vec::new());
        }
        for candidate in search_candidates(name) {
            let items = self.search(&format!("name={}", candidate), ctx)?;
            if !items.is_empty() {
                debug!("find_constituent: matched {:?} as {:?}", name, candidate);
                return Ok(items);
            }
        }
        Ok(Vec::new())
    }

    /// Resolves a donor to a constituent id. An empty string means "no
    /// confident match": both the zero-match and the many-match cases are
    /// reported for human review rather than guessed at.
    pub fn find_constituent_id(
        &self,
        name: &str,
        email: &str,
        file_name: &str,
        ctx: &RunContext,
    ) -> BEtlResult<String> {
        debug!("find_constituent_id: {:?} / {:?}", name, email);
        let items = self.find_constituent(name, email, ctx)?;
        match classify_matches(&items) {
            MatchOutcome::NoMatch => {
                ctx.notify(format!(
                    "The constituent {:?} from the file {:?} was not found.",
                    name, file_name
                ));
                Ok(String::new())
            }
            MatchOutcome::One(id) => {
                debug!("The constituent ID is {}.", id);
                Ok(id)
            }
            MatchOutcome::Ambiguous(candidates) => {
                ctx.notify(format!(
                    "The constituent {:?} from the file {:?} matched more than one record: {}. \
                     No ID was assigned; please match this donor by hand.",
                    name,
                    file_name,
                    candidates.join(", ")
                ));
                Ok(String::new())
            }
        }
    }

    /// Fetches the constituent detail record.
    pub fn get_constituent_info(
        &self,
        constituent_id: &str,
        ctx: &RunContext,
    ) -> BEtlResult<ConstituentDetail> {
        let url = format!("{}/constituents/{}", self.api_base, constituent_id);
        let value = self.get_json(&url, &[], ctx)?;
        let detail =
            serde_json::from_value(value).context(UnexpectedResponseShapeSnafu { url })?;
        Ok(detail)
    }

    /// Fetches the constituent's most recent gifts.
    pub fn get_donations(&self, constituent_id: &str, ctx: &RunContext) -> BEtlResult<Vec<Donation>> {
        let url = format!(
            "{}/constituents/{}/gifts.json",
            self.api_base, constituent_id
        );
        let value = self.get_json(&url, &[("limit", "10")], ctx)?;
        let items = value
            .get("items")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        let donations =
            serde_json::from_value(items).context(UnexpectedResponseShapeSnafu { url })?;
        Ok(donations)
    }

    fn search(&self, query: &str, ctx: &RunContext) -> BEtlResult<Vec<ConstituentSummary>> {
        let url = format!("{}/constituents/search", self.api_base);
        let value = self.get_json(&url, &[("q", query)], ctx)?;
        let items = value
            .get("items")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        let parsed = serde_json::from_value(items).context(UnexpectedResponseShapeSnafu { url })?;
        Ok(parsed)
    }

    // The single funnel for every outbound call: consults the rate limiter,
    // attaches the token, and turns bad statuses into errors. A 429 is
    // terminal for the whole run.
    fn get_json(
        &self,
        url: &str,
        params: &[(&str, &str)],
        ctx: &RunContext,
    ) -> BEtlResult<serde_json::Value> {
        ctx.limiter.borrow_mut().record_call();
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("access_token", self.token.as_str()));
        let response = self
            .http
            .get(url)
            .query(&query)
            .send()
            .context(HttpRequestSnafu { url })?;
        let status = response.status().as_u16();
        if status == 429 {
            error!(
                "The call to {} returned HTTP 429: the API call quota is exhausted.",
                url
            );
            return Err(Box::new(EtlError::QuotaExhausted {}));
        }
        if !response.status().is_success() {
            error!(
                "The call to {} with parameters {:?} failed with HTTP status {}.",
                url, params, status
            );
            return Err(Box::new(EtlError::HttpStatus {
                status,
                url: url.to_string(),
            }));
        }
        let value: serde_json::Value = response.json().context(DecodingResponseSnafu { url })?;
        debug!("The json response is: {}", value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: i64, first: &str, last: &str) -> ConstituentSummary {
        ConstituentSummary {
            id,
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            addressee: None,
        }
    }

    #[test]
    fn classify_matches_never_picks_between_multiple_hits() {
        let items = vec![summary(1, "John", "Smith"), summary(2, "John", "Smith")];
        match classify_matches(&items) {
            MatchOutcome::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates[0].contains("John Smith"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn classify_matches_single_hit_yields_the_id() {
        let items = vec![summary(42, "Jane", "Doe")];
        assert_eq!(classify_matches(&items), MatchOutcome::One("42".to_string()));
        assert_eq!(classify_matches(&[]), MatchOutcome::NoMatch);
    }

    #[test]
    fn rate_limiter_sleeps_when_the_window_fills() {
        let mut limiter = RateLimiter::with_limits(3, 10);
        assert_eq!(limiter.check_in(100), None);
        assert_eq!(limiter.check_in(101), None);
        assert_eq!(limiter.check_in(102), None);
        // Fourth call: the lookback window spans 3 seconds, far under the
        // 10 second period, so the remainder must be slept off.
        let wait = limiter.check_in(103).expect("a sleep is required");
        assert_eq!(wait, Duration::from_secs(10 - 3));
    }

    #[test]
    fn rate_limiter_allows_spaced_out_calls() {
        let mut limiter = RateLimiter::with_limits(3, 10);
        for t in [0u64, 20, 40, 60, 80, 100] {
            assert_eq!(limiter.check_in(t), None, "at t={}", t);
        }
    }

    #[test]
    fn rate_limiter_counter_resets_after_a_sleep() {
        let mut limiter = RateLimiter::with_limits(2, 10);
        assert_eq!(limiter.check_in(0), None);
        assert_eq!(limiter.check_in(0), None);
        assert!(limiter.check_in(0).is_some());
        // Counter was reset: the next call alone does not trip the check.
        assert_eq!(limiter.check_in(1), None);
    }

    #[test]
    fn usable_emails_need_an_at_sign() {
        assert!(is_usable_email("donor@example.org"));
        assert!(!is_usable_email("   "));
        assert!(!is_usable_email("nan"));
    }

    #[test]
    fn search_results_parse_from_the_items_shape() {
        let body = serde_json::json!({
            "items": [
                { "id": 903, "first_name": "John", "last_name": "Smith" }
            ],
            "total_items": 1
        });
        let items: Vec<ConstituentSummary> =
            serde_json::from_value(body["items"].clone()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, 903);
        assert_eq!(items[0].display_name(), "John Smith");
    }

    #[test]
    fn detail_prefers_the_preferred_address_and_email() {
        let body = serde_json::json!({
            "id": 903,
            "first_name": "John",
            "last_name": "Smith",
            "street_addresses": [
                { "street": "1 Old Rd", "city": "Natick", "state": "MA",
                  "postal_code": "01760", "is_preferred": false },
                { "street": "123 Main St", "city": "Boston", "state": "MA",
                  "postal_code": "02115-3456", "is_preferred": true }
            ],
            "email_addresses": [
                { "address": "john@example.org", "is_preferred": true }
            ]
        });
        let detail: ConstituentDetail = serde_json::from_value(body).unwrap();
        let address = detail.preferred_address().unwrap();
        assert_eq!(address.street, "123 Main St");
        assert_eq!(detail.preferred_email().unwrap().address, "john@example.org");
    }
}
