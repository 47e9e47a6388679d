//! Text normalization for donor names and postal addresses.
//!
//! Everything in this module is a pure function on strings. The CRM search
//! ladder and the address-variance checks in the binary crate are built on
//! top of these.

use log::debug;

const NOISE_TOKENS: [&str; 4] = ["and", "or", "&", "fund"];

/// Tokens that mark an institution name. Single-letter "initials" inside
/// such a name are part of the name ("Bank of A. Smith & Co"), so the
/// initial-stripping relaxation is skipped for them.
const INSTITUTION_TOKENS: [&str; 2] = ["bank", "banking"];

/// Upper-cases the first letter of every whitespace-separated word and
/// lower-cases the rest.
pub fn title_case(text: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let mut out = String::with_capacity(word.len());
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
        }
        out.extend(chars.flat_map(|c| c.to_lowercase()));
        words.push(out);
    }
    words.join(" ")
}

/// Cleans a donor name before it is sent to the CRM search endpoint.
///
/// All-caps names become title-case, trailing periods are dropped from
/// every token, and connective noise tokens ("and", "or", "&", "fund") are
/// removed entirely: the search endpoint matches them too aggressively.
pub fn clean_name(name: &str) -> String {
    let mut name = name.trim().to_string();
    let has_letters = name.chars().any(|c| c.is_alphabetic());
    let has_lowercase = name.chars().any(|c| c.is_lowercase());
    if has_letters && !has_lowercase {
        name = title_case(&name);
    }
    let kept: Vec<&str> = name
        .split_whitespace()
        .map(|t| t.trim_end_matches('.'))
        .filter(|t| !t.is_empty())
        .filter(|t| {
            let lower = t.to_lowercase();
            !NOISE_TOKENS.iter().any(|n| *n == lower)
        })
        .collect();
    kept.join(" ")
}

// The relaxation steps below deliberately mangle the name. Each one is only
// tried after every query built from the previous steps came back empty.

// "MaryJones" -> "Mary Jones".
fn split_joined_capitals(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase();
        out.push(c);
    }
    out
}

// Inserts a space before any uppercase letter glued to the previous
// character, whatever that character is: "Mary2Jones" -> "Mary2 Jones".
fn space_before_uppercase(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if let Some(p) = prev {
            if c.is_uppercase() && !p.is_whitespace() && !p.is_uppercase() {
                out.push(' ');
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

// Drops single-letter tokens ("John Q Public" -> "John Public"), except in
// institution names where a stray initial is usually meaningful.
fn strip_initials(name: &str) -> String {
    let is_institution = name
        .split_whitespace()
        .any(|t| INSTITUTION_TOKENS.iter().any(|i| t.eq_ignore_ascii_case(i)));
    if is_institution {
        return name.to_string();
    }
    let kept: Vec<&str> = name
        .split_whitespace()
        .filter(|t| t.chars().count() > 1)
        .collect();
    kept.join(" ")
}

// Keeps every other token, approximating the removal of middle names:
// "John Quincy Public" -> "John Public".
fn drop_alternate_tokens(name: &str) -> String {
    let kept: Vec<&str> = name
        .split_whitespace()
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, t)| t)
        .collect();
    kept.join(" ")
}

/// The progressive search ladder for one donor name.
///
/// The first entry is the cleaned name itself; each following entry applies
/// one more relaxation on top of the previous one. The caller queries them
/// in order and stops at the first query that returns results. Consecutive
/// duplicates (steps that changed nothing) are collapsed.
pub fn search_candidates(name: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let cleaned = clean_name(name);
    push_candidate(&mut out, cleaned.clone());
    let step1 = split_joined_capitals(&cleaned);
    push_candidate(&mut out, step1.clone());
    let step2 = space_before_uppercase(&step1);
    push_candidate(&mut out, step2.clone());
    let step3 = strip_initials(&step2);
    push_candidate(&mut out, step3.clone());
    push_candidate(&mut out, drop_alternate_tokens(&step3));
    debug!("search_candidates: {:?} -> {:?}", name, out);
    out
}

fn push_candidate(out: &mut Vec<String>, candidate: String) {
    if !candidate.trim().is_empty() && !out.contains(&candidate) {
        out.push(candidate);
    }
}

// ---------------------------------------------------------------------
// Street addresses
// ---------------------------------------------------------------------

/// Street-type and directional words in the long form the donor files use,
/// mapped to the abbreviation the CRM stores.
const STREET_ABBREVIATIONS: [(&str, &str); 22] = [
    ("apartment", "apt"),
    ("avenue", "ave"),
    ("boulevard", "blvd"),
    ("circle", "cir"),
    ("court", "ct"),
    ("drive", "dr"),
    ("east", "e"),
    ("highway", "hwy"),
    ("lane", "ln"),
    ("north", "n"),
    ("northeast", "ne"),
    ("northwest", "nw"),
    ("parkway", "pkwy"),
    ("place", "pl"),
    ("road", "rd"),
    ("south", "s"),
    ("southeast", "se"),
    ("southwest", "sw"),
    ("square", "sq"),
    ("street", "st"),
    ("suite", "ste"),
    ("west", "w"),
];

/// Normalizes a street line for comparison against the CRM's copy.
///
/// Lower-cases, strips punctuation, contracts street-type and directional
/// words to the CRM's abbreviations, title-cases the result and restores
/// the "PO Box" capitalization. The function is idempotent: feeding its
/// output back in yields the same string.
pub fn normalize_street(street: &str) -> String {
    let stripped: String = street
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    let words: Vec<&str> = stripped
        .split_whitespace()
        .map(|word| {
            STREET_ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == word)
                .map(|(_, short)| *short)
                .unwrap_or(word)
        })
        .collect();
    title_case(&words.join(" "))
        .replace("P O Box", "PO Box")
        .replace("Po Box", "PO Box")
}

// ---------------------------------------------------------------------
// Packed mailing addresses
// ---------------------------------------------------------------------

/// A packed one-field mailing address split into its components.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct PackedAddress {
    pub line1: String,
    pub line2: String,
    pub line3: String,
    pub city: String,
    pub state: String,
    pub postal: String,
}

/// Outcome of splitting a comma-joined mailing address.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum AddressSplit {
    /// The field holds no comma-joined address at all; nothing to do.
    NoAddress,
    /// The field has a segment count outside 4..=6 and cannot be
    /// interpreted. The count is reported for the log.
    BadSegmentCount(usize),
    Split(PackedAddress),
}

/// Splits a comma-joined mailing address into discrete fields.
///
/// The segment count tells which optional lines are present: 4 segments
/// mean line 1 only, 5 add line 2, 6 add line 3. The last three segments
/// are always city, state and postal code, in that order.
pub fn split_packed_address(raw: &str) -> AddressSplit {
    let raw = raw.trim();
    if raw.is_empty() || !raw.contains(',') {
        return AddressSplit::NoAddress;
    }
    let segments: Vec<&str> = raw.split(',').map(|s| s.trim()).collect();
    let n = segments.len();
    if !(4..=6).contains(&n) {
        return AddressSplit::BadSegmentCount(n);
    }
    let mut address = PackedAddress {
        line1: segments[0].to_string(),
        ..PackedAddress::default()
    };
    if n >= 5 {
        address.line2 = segments[1].to_string();
    }
    if n == 6 {
        address.line3 = segments[2].to_string();
    }
    address.city = segments[n - 3].to_string();
    address.state = segments[n - 2].to_string();
    address.postal = segments[n - 1].to_string();
    AddressSplit::Split(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_name_title_cases_all_caps() {
        assert_eq!(clean_name("JOHN SMITH"), "John Smith");
        // Mixed-case names are left alone.
        assert_eq!(clean_name("Angus MacDonald"), "Angus MacDonald");
    }

    #[test]
    fn clean_name_strips_noise_tokens_and_trailing_periods() {
        assert_eq!(clean_name("Carolyn and Andy Limeri"), "Carolyn Andy Limeri");
        assert_eq!(clean_name("Ed Kross Charitable Fund"), "Ed Kross Charitable");
        assert_eq!(clean_name("John Q. Public Jr."), "John Q Public Jr");
        assert_eq!(clean_name("Smith & Jones"), "Smith Jones");
    }

    #[test]
    fn search_candidates_starts_with_the_cleaned_name() {
        let candidates = search_candidates("JOHN SMITH");
        assert_eq!(candidates[0], "John Smith");
    }

    #[test]
    fn search_candidates_splits_joined_capitals() {
        let candidates = search_candidates("MaryJones");
        assert!(candidates.contains(&"Mary Jones".to_string()));
        // The joined form is queried first.
        assert_eq!(candidates[0], "MaryJones");
    }

    #[test]
    fn search_candidates_strips_initials_and_middle_tokens() {
        let candidates = search_candidates("John Q Public");
        assert!(candidates.contains(&"John Public".to_string()));
        let candidates = search_candidates("John Quincy Public");
        assert!(candidates.contains(&"John Public".to_string()));
    }

    #[test]
    fn search_candidates_keeps_initials_in_institution_names() {
        let candidates = search_candidates("Bank of A Canton");
        // "of" survives cleaning; the single letter must never be removed
        // from an institution name.
        assert!(candidates.iter().all(|c| c.contains('A')));
    }

    #[test]
    fn search_candidates_collapses_noop_steps() {
        // Steps 1-3 change nothing for a plain two-token name; only the
        // final token-dropping relaxation adds a candidate.
        let candidates = search_candidates("John Smith");
        assert_eq!(
            candidates,
            vec!["John Smith".to_string(), "John".to_string()]
        );
    }

    #[test]
    fn normalize_street_contracts_and_title_cases() {
        assert_eq!(normalize_street("123 North Main Street"), "123 N Main St");
        assert_eq!(normalize_street("123 MAIN ST."), "123 Main St");
        assert_eq!(normalize_street("p.o. box 42"), "PO Box 42");
    }

    #[test]
    fn normalize_street_is_idempotent() {
        for input in [
            "123 Main St",
            "123 North Main Street",
            "PO Box 42",
            "55 Squanto Road, Apt 3",
        ] {
            let once = normalize_street(input);
            assert_eq!(normalize_street(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn split_packed_address_four_segments() {
        let split = split_packed_address("123 Main St, Boston, MA, 02115");
        assert_eq!(
            split,
            AddressSplit::Split(PackedAddress {
                line1: "123 Main St".to_string(),
                city: "Boston".to_string(),
                state: "MA".to_string(),
                postal: "02115".to_string(),
                ..PackedAddress::default()
            })
        );
    }

    #[test]
    fn split_packed_address_five_segments() {
        let split = split_packed_address("123 Main St, Apt 4, Boston, MA, 02115");
        match split {
            AddressSplit::Split(a) => {
                assert_eq!(a.line1, "123 Main St");
                assert_eq!(a.line2, "Apt 4");
                assert_eq!(a.line3, "");
                assert_eq!(a.city, "Boston");
                assert_eq!(a.state, "MA");
                assert_eq!(a.postal, "02115");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn split_packed_address_six_segments() {
        let split =
            split_packed_address("123 Main St, Building B, Apt 4, Boston, MA, 02115");
        match split {
            AddressSplit::Split(a) => {
                assert_eq!(a.line2, "Building B");
                assert_eq!(a.line3, "Apt 4");
                assert_eq!(a.city, "Boston");
                assert_eq!(a.state, "MA");
                assert_eq!(a.postal, "02115");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn split_packed_address_last_three_segments_are_city_state_postal() {
        for input in [
            "l1, Boston, MA, 02115",
            "l1, l2, Boston, MA, 02115",
            "l1, l2, l3, Boston, MA, 02115",
        ] {
            match split_packed_address(input) {
                AddressSplit::Split(a) => {
                    assert_eq!((a.city.as_str(), a.state.as_str(), a.postal.as_str()),
                        ("Boston", "MA", "02115"), "input {:?}", input);
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn split_packed_address_rejects_bad_segment_counts() {
        assert_eq!(
            split_packed_address("Boston, MA, 02115"),
            AddressSplit::BadSegmentCount(3)
        );
        assert_eq!(
            split_packed_address("a, b, c, d, e, f, g"),
            AddressSplit::BadSegmentCount(7)
        );
        assert_eq!(split_packed_address("no commas here"), AddressSplit::NoAddress);
        assert_eq!(split_packed_address(""), AddressSplit::NoAddress);
    }
}
