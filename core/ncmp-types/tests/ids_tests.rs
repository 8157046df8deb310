use ncmp_types::{CmHandleId, SubscriptionKey};
use std::collections::HashSet;
use std::str::FromStr;

// ── CmHandleId ────────────────────────────────────────────────────

#[test]
fn parse_accepts_alphanumeric_dash_underscore() {
    let id = CmHandleId::parse("ch-01_A").unwrap();
    assert_eq!(id.as_str(), "ch-01_A");
}

#[test]
fn parse_rejects_empty() {
    let err = CmHandleId::parse("").unwrap_err();
    assert_eq!(err.reason, "id is empty");
}

#[test]
fn parse_rejects_invalid_characters() {
    for bad in ["a b", "ch[1]", "x'y", "a/b", "a.b", "@home"] {
        assert!(CmHandleId::parse(bad).is_err(), "{bad} should be rejected");
    }
}

#[test]
fn new_skips_validation_but_is_valid_reports_it() {
    let id = CmHandleId::new("not valid");
    assert!(!id.is_valid());
    assert!(CmHandleId::new("fine").is_valid());
}

#[test]
fn from_str_validates() {
    assert!(CmHandleId::from_str("ok-1").is_ok());
    assert!(CmHandleId::from_str("no way").is_err());
}

#[test]
fn display_matches_inner() {
    assert_eq!(CmHandleId::new("ch-9").to_string(), "ch-9");
}

#[test]
fn hash_and_eq() {
    let mut set = HashSet::new();
    set.insert(CmHandleId::new("a"));
    set.insert(CmHandleId::new("a"));
    assert_eq!(set.len(), 1);
}

#[test]
fn serde_is_transparent() {
    let json = serde_json::to_string(&CmHandleId::new("ch-1")).unwrap();
    assert_eq!(json, "\"ch-1\"");
}

// ── SubscriptionKey ───────────────────────────────────────────────

#[test]
fn subscription_key_concatenates_client_and_name() {
    let key = SubscriptionKey::new("SCO-9989752", "cm-subscription-001");
    assert_eq!(key.as_str(), "SCO-9989752cm-subscription-001");
}
