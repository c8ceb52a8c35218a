// tests/keyword_fixture.rs
use serde::Deserialize;

use regwatch::events::detect::{EVENT_KEYWORDS, REGULATION_CODES};
use regwatch::events::EventType;

#[derive(Deserialize)]
struct Pinned {
    version: u32,
    event_keywords: Vec<PinnedGroup>,
    regulation_codes: Vec<String>,
}

#[derive(Deserialize)]
struct PinnedGroup {
    event_type: EventType,
    keywords: Vec<String>,
}

fn pinned() -> Pinned {
    let raw = include_str!("fixtures/event_keywords.v1.json");
    serde_json::from_str(raw).expect("valid keyword fixture")
}

#[test]
fn event_keywords_match_the_pinned_table_in_order() {
    let p = pinned();
    assert_eq!(p.version, 1);
    assert_eq!(p.event_keywords.len(), EVENT_KEYWORDS.len());
    for (pin, (ty, kws)) in p.event_keywords.iter().zip(EVENT_KEYWORDS) {
        assert_eq!(pin.event_type, *ty);
        assert_eq!(pin.keywords, kws.iter().map(|k| k.to_string()).collect::<Vec<_>>(), "{ty:?}");
    }
}

#[test]
fn regulation_codes_match_the_pinned_list() {
    let p = pinned();
    assert_eq!(p.regulation_codes, REGULATION_CODES);
}
