// tests/delta_quality.rs
use regwatch::enrich::Enrichment;
use regwatch::events::delta::{validate_delta, DeltaNarrative, MIN_FIELD_CHARS};
use regwatch::quality::{breakdown, score, sentence_count};
use regwatch::relevance::{self, SkipReason};

fn field(prefix: &str) -> Option<String> {
    let s = format!("{prefix} is described in enough detail for a reader to act.");
    assert!(s.len() >= MIN_FIELD_CHARS);
    Some(s)
}

#[test]
fn five_complete_fields_score_100_and_validate() {
    let n = DeltaNarrative {
        previous_assumption: field("The previous assumption"),
        new_information: field("The new information"),
        what_changed: field("What changed"),
        what_did_not_change: field("What did not change"),
        decision_impact: field("The decision impact"),
    };
    let v = validate_delta(&n);
    assert_eq!(v.completeness_score, 100);
    assert!(v.is_valid);
    assert!(v.missing_fields.is_empty());
    assert!(v.forbidden_placeholders.is_empty());
}

#[test]
fn two_missing_fields_score_60_and_fail() {
    let n = DeltaNarrative {
        previous_assumption: None,
        new_information: field("The new information"),
        what_changed: field("What changed"),
        what_did_not_change: None,
        decision_impact: field("The decision impact"),
    };
    let v = validate_delta(&n);
    assert_eq!(v.completeness_score, 60);
    assert!(!v.is_valid);
    assert_eq!(v.missing_fields, vec!["previous_assumption", "what_did_not_change"]);
}

#[test]
fn placeholder_field_lowers_score_without_being_missing() {
    let n = DeltaNarrative {
        previous_assumption: field("The previous assumption"),
        new_information: field("The new information"),
        what_changed: Some("The final scope of the delegated act is to be determined later.".into()),
        what_did_not_change: field("What did not change"),
        decision_impact: field("The decision impact"),
    };
    let v = validate_delta(&n);
    assert_eq!(v.completeness_score, 80);
    // Placeholders are reported separately and do not count as missing.
    assert!(v.missing_fields.is_empty());
    assert!(v.is_valid);
    assert_eq!(v.forbidden_placeholders, vec!["what_changed: \"to be determined\""]);
}

#[test]
fn whitespace_padding_does_not_count() {
    let padded = format!("   {}   ", "short but padded");
    let n = DeltaNarrative {
        previous_assumption: Some(padded),
        ..Default::default()
    };
    let v = validate_delta(&n);
    assert_eq!(v.completeness_score, 0);
    assert_eq!(v.missing_fields.len(), 5);
}

fn full_enrichment() -> Enrichment {
    Enrichment {
        headline: "EU adopts Digital Product Passport requirements for textiles".into(),
        summary: "The Commission adopted the first ESPR delegated act for textiles. Products will need a \
                  Digital Product Passport from 2027. Data carriers such as GS1 Digital Link are named \
                  as acceptable identifiers."
            .into(),
        regulation_tags: vec!["ESPR".into(), "DPP".into()],
        gs1_impact_tags: vec!["DPP".into(), "IDENTIFICATION".into()],
        sector_tags: vec!["TEXTILES".into()],
        suggested_actions: vec!["Assign GTINs at model level".into()],
        related_standards: vec!["GTIN".into(), "DIGITAL LINK".into()],
        ..Default::default()
    }
}

#[test]
fn full_enrichment_scores_high_and_empty_scores_low() {
    let full = full_enrichment();
    let s = score(&full);
    assert!(s > 0.8, "{s}");
    assert!(score(&Enrichment::default()) < 0.3);

    // Deterministic.
    assert_eq!(score(&full), s);
    let b = breakdown(&full);
    assert!((b.tag_accuracy - 1.0).abs() < 1e-9);
    assert!((b.citation_completeness - 1.0).abs() < 1e-9);
    assert!((b.summary_coherence - 1.0).abs() < 1e-9);
}

#[test]
fn sentence_count_is_segment_count() {
    assert_eq!(sentence_count("A. B"), 2);
    assert_eq!(sentence_count("One sentence"), 1);
    assert_eq!(sentence_count(""), 1);
}

#[test]
fn relevance_gate_uses_strict_length() {
    let mut e = full_enrichment();
    assert_eq!(relevance::check(&e, 50), Ok(()));

    e.summary = "b".repeat(51);
    assert_eq!(relevance::check(&e, 50), Ok(()));

    e.headline = "No relevant regulatory news found".into();
    assert_eq!(relevance::check(&e, 50), Err(SkipReason::PlaceholderHeadline));
}
