//! Configuration loading against the shipped config file.

use serial_monitor::config::Settings;
use serial_monitor::measurement::LogFormat;
use serial_monitor::repeater::FailurePolicy;
use serial_monitor::transport::LinkSettings;
use std::time::Duration;

#[test]
fn shipped_config_matches_defaults() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/serial_monitor.toml");
    let text = std::fs::read_to_string(path).unwrap();
    let from_file: Settings = toml::from_str(&text).unwrap();
    assert_eq!(from_file, Settings::default());
    assert!(from_file.validate().is_ok());
}

#[test]
fn partial_file_keeps_other_defaults() {
    let settings: Settings = toml::from_str(
        r#"
        [serial]
        reset_delay_ms = 250

        [storage]
        firmware_version = "24.06.01"
        "#,
    )
    .unwrap();

    assert_eq!(settings.serial.baud_rate, 9600);
    assert_eq!(settings.storage.firmware_version, "24.06.01");
    assert_eq!(settings.storage.format, LogFormat::Text);
    assert_eq!(settings.acquisition.failure_policy, FailurePolicy::Continue);

    let link = LinkSettings::from(&settings.serial);
    assert_eq!(link.reset_delay, Duration::from_millis(250));
    assert_eq!(link.read_timeout, Duration::from_millis(2000));
}

#[test]
fn unknown_policy_is_rejected() {
    let result: Result<Settings, _> = toml::from_str("[acquisition]\nfailure_policy = \"retry\"\n");
    assert!(result.is_err());
}

#[test]
fn settings_round_trip_through_toml() {
    let mut settings = Settings::default();
    settings.storage.output_dir = Some("logs".into());
    settings.acquisition.failure_policy = FailurePolicy::Abort;

    let text = toml::to_string_pretty(&settings).unwrap();
    let parsed: Settings = toml::from_str(&text).unwrap();
    assert_eq!(parsed, settings);
}
