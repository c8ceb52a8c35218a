// src/events/delta.rs
//! Delta narrative completeness.
//!
//! A field is complete when present, at least `MIN_FIELD_CHARS` characters after
//! trimming, and free of placeholder phrases. A field that is long enough but
//! carries a placeholder is reported under `forbidden_placeholders`, not under
//! `missing_fields`.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MIN_FIELD_CHARS: usize = 40;
pub const VALID_SCORE: u8 = 80;

/// Matched as case-insensitive substrings.
pub const PLACEHOLDER_PHRASES: &[&str] = &[
    "to be determined",
    "pending further",
    "unknown at this point",
    "not applicable at this time",
    "[placeholder]",
];

/// Matched as case-insensitive whole words.
pub const PLACEHOLDER_WORDS: &[&str] = &["tbd", "n/a", "xxx"];

/// The five narrative fields of a regulatory event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaNarrative {
    pub previous_assumption: Option<String>,
    pub new_information: Option<String>,
    pub what_changed: Option<String>,
    pub what_did_not_change: Option<String>,
    pub decision_impact: Option<String>,
}

impl DeltaNarrative {
    pub fn fields(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("previous_assumption", self.previous_assumption.as_deref()),
            ("new_information", self.new_information.as_deref()),
            ("what_changed", self.what_changed.as_deref()),
            ("what_did_not_change", self.what_did_not_change.as_deref()),
            ("decision_impact", self.decision_impact.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaValidation {
    pub is_valid: bool,
    /// round(100 × complete / 5)
    pub completeness_score: u8,
    pub missing_fields: Vec<String>,
    /// `field: "phrase"` entries.
    pub forbidden_placeholders: Vec<String>,
}

fn placeholder_word_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    // `n/a` contains a slash, so boundaries are spelled out instead of `\b`.
    RE.get_or_init(|| Regex::new(r"(?i)(?:^|[^a-z0-9])(tbd|n/a|xxx)(?:$|[^a-z0-9])").unwrap())
}

/// First placeholder found in `text`, lowercased.
pub fn find_placeholder(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if let Some(p) = PLACEHOLDER_PHRASES.iter().find(|p| lower.contains(*p)) {
        return Some((*p).to_string());
    }
    placeholder_word_regex()
        .captures(&lower)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn validate_delta(narrative: &DeltaNarrative) -> DeltaValidation {
    let mut missing_fields = Vec::new();
    let mut forbidden_placeholders = Vec::new();
    let mut complete = 0u32;

    for (name, value) in narrative.fields() {
        let trimmed = value.map(str::trim).unwrap_or_default();
        if trimmed.chars().count() < MIN_FIELD_CHARS {
            missing_fields.push(name.to_string());
            continue;
        }
        match find_placeholder(trimmed) {
            Some(phrase) => forbidden_placeholders.push(format!("{name}: \"{phrase}\"")),
            None => complete += 1,
        }
    }

    let completeness_score = ((complete as f64 / 5.0) * 100.0).round() as u8;
    DeltaValidation {
        is_valid: completeness_score >= VALID_SCORE && missing_fields.is_empty(),
        completeness_score,
        missing_fields,
        forbidden_placeholders,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_word_placeholders_only() {
        assert_eq!(find_placeholder("Status is TBD for now").as_deref(), Some("tbd"));
        assert_eq!(find_placeholder("value: n/a").as_deref(), Some("n/a"));
        assert!(find_placeholder("The outbd value").is_none());
        assert!(find_placeholder("a maxxxed field").is_none());
    }

    #[test]
    fn phrases_match_anywhere() {
        assert_eq!(
            find_placeholder("Scope remains To Be Determined by the Commission").as_deref(),
            Some("to be determined")
        );
    }

    #[test]
    fn placeholder_field_is_not_missing() {
        let long = "x".repeat(10);
        let n = DeltaNarrative {
            previous_assumption: Some(
                "Companies assumed reporting would start in the 2025 financial year.".into(),
            ),
            new_information: Some("The delegated act scope is still tbd according to the draft.".into()),
            what_changed: Some(long),
            what_did_not_change: None,
            decision_impact: Some(
                "Firms must keep preparing ESRS datapoints for first-wave reporting.".into(),
            ),
        };
        let v = validate_delta(&n);
        assert_eq!(v.completeness_score, 40);
        assert_eq!(v.missing_fields, vec!["what_changed", "what_did_not_change"]);
        assert_eq!(v.forbidden_placeholders, vec!["new_information: \"tbd\""]);
        assert!(!v.is_valid);
    }
}
