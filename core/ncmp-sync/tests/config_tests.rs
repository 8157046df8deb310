use ncmp_sync::{NcmpConfig, NcmpError};
use std::io::Write;
use std::time::Duration;

#[test]
fn defaults() {
    let config = NcmpConfig::default();
    assert!(config.instance_id.starts_with("ncmp-"));
    assert_eq!(config.watchdog.data_sync_interval(), Duration::from_secs(30));
    assert_eq!(config.watchdog.module_sync_interval(), Duration::from_secs(5));
    assert_eq!(config.watchdog.in_flight_ttl(), Duration::from_secs(300));
    assert_eq!(config.subscription.response_timeout(), Duration::from_secs(30));
    assert!(config.subscription.notifications_enabled);
    assert!(!config.subscription.persistence_enabled);
    assert_eq!(config.topics.lcm_events, "ncmp-events");
    assert_eq!(config.topics.subscription_outcomes, "subscription-response");
}

#[test]
fn instance_ids_differ_between_defaults() {
    assert_ne!(
        NcmpConfig::default().instance_id,
        NcmpConfig::default().instance_id
    );
}

#[test]
fn partial_json_keeps_other_defaults() {
    let config = NcmpConfig::from_json(
        r#"{
            "instance_id": "ncmp-0",
            "watchdog": {"retry_base_secs": 5},
            "subscription": {"persistence_enabled": true}
        }"#,
    )
    .unwrap();

    assert_eq!(config.instance_id, "ncmp-0");
    assert_eq!(config.watchdog.retry_base(), Duration::from_secs(5));
    assert_eq!(config.watchdog.in_flight_ttl_secs, 300);
    assert!(config.subscription.persistence_enabled);
    assert!(config.subscription.notifications_enabled);
}

#[test]
fn malformed_json_is_a_config_error() {
    assert!(matches!(
        NcmpConfig::from_json("{ not json"),
        Err(NcmpError::Config(_))
    ));
}

#[test]
fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"topics": {{"lcm_events": "custom-lcm"}}}}"#).unwrap();

    let config = NcmpConfig::load(file.path()).unwrap();
    assert_eq!(config.topics.lcm_events, "custom-lcm");
    assert_eq!(config.topics.subscription_outcomes, "subscription-response");
}

#[test]
fn load_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let result = NcmpConfig::load(&dir.path().join("absent.json"));
    assert!(matches!(result, Err(NcmpError::Config(_))));
}
