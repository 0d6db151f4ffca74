use std::time::Duration;

use assert_matches::assert_matches;

use inat_area_import::config::{Config, ConfigLoader};
use inat_area_import::domain::{OutputField, PhotoMode};
use inat_area_import::error::InatError;

#[test]
fn parse_config_overrides() {
    let config: Config = serde_json::from_str(
        r#"{
            "schema_version": 1,
            "per_page": 50,
            "locale": "en",
            "call_delay_ms": 0,
            "rate_limit_cooldown_secs": 5,
            "max_rate_limit_attempts": 0,
            "fields": ["scientific_name", "latitude"],
            "photo_mode": "one"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.per_page, 50);
    assert_eq!(resolved.locale.as_deref(), Some("en"));
    assert_eq!(resolved.retry.call_delay, Duration::ZERO);
    assert_eq!(resolved.retry.cooldown, Duration::from_secs(5));
    assert_eq!(resolved.retry.max_attempts, 1);
    assert_eq!(
        resolved.fields,
        vec![OutputField::ScientificName, OutputField::Latitude]
    );
    assert_eq!(resolved.photo_mode, PhotoMode::One);
}

#[test]
fn blank_locale_is_dropped() {
    let config = Config {
        locale: Some("  ".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.locale, None);
}

#[test]
fn per_page_above_api_limit_is_rejected() {
    let config = Config {
        per_page: Some(500),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, InatError::ConfigParse(_));
}

#[test]
fn unknown_field_is_rejected() {
    let config = Config {
        fields: Some(vec!["vernacular_name_FR".to_string()]),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, InatError::InvalidField(_));
}

#[test]
fn explicit_missing_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("missing.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, InatError::ConfigRead(_));
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("inat-import.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, InatError::ConfigParse(_));
}
