//! Tests for Azure configuration validation.

use std::time::Duration;

use flotilla::{AzureConfig, ConfigError};
use rstest::*;

#[fixture]
fn valid_config() -> AzureConfig {
    AzureConfig {
        subscription_id: String::from("11111111-2222-3333-4444-555555555555"),
        access_token: String::from("eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9"),
        resource_manager_endpoint: String::from("https://management.azure.com"),
        create_timeout_minutes: 30,
        read_timeout_minutes: 5,
        update_timeout_minutes: 30,
        delete_timeout_minutes: 30,
        operation_poll_interval_secs: 10,
    }
}

#[rstest]
fn config_validation_rejects_missing_subscription_with_actionable_error(
    valid_config: AzureConfig,
) {
    let cfg = AzureConfig {
        subscription_id: String::new(),
        ..valid_config
    };

    let error = cfg.validate().expect_err("subscription is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error");
    };
    assert!(
        message.contains("AZURE_SUBSCRIPTION_ID"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("flotilla.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains("subscription_id"),
        "error should mention TOML key: {message}"
    );
}

#[rstest]
#[case::token(
    |cfg: &mut AzureConfig| cfg.access_token.clear(),
    "AZURE_ACCESS_TOKEN",
    "access_token"
)]
#[case::endpoint(
    |cfg: &mut AzureConfig| cfg.resource_manager_endpoint = String::from("  "),
    "AZURE_RESOURCE_MANAGER_ENDPOINT",
    "resource_manager_endpoint"
)]
#[case::create_timeout(
    |cfg: &mut AzureConfig| cfg.create_timeout_minutes = 0,
    "AZURE_CREATE_TIMEOUT_MINUTES",
    "create_timeout_minutes"
)]
#[case::read_timeout(
    |cfg: &mut AzureConfig| cfg.read_timeout_minutes = 0,
    "AZURE_READ_TIMEOUT_MINUTES",
    "read_timeout_minutes"
)]
#[case::update_timeout(
    |cfg: &mut AzureConfig| cfg.update_timeout_minutes = 0,
    "AZURE_UPDATE_TIMEOUT_MINUTES",
    "update_timeout_minutes"
)]
#[case::poll_interval(
    |cfg: &mut AzureConfig| cfg.operation_poll_interval_secs = 0,
    "AZURE_OPERATION_POLL_INTERVAL_SECS",
    "operation_poll_interval_secs"
)]
fn config_validation_produces_actionable_errors(
    valid_config: AzureConfig,
    #[case] mutate: fn(&mut AzureConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);
    let message = cfg
        .validate()
        .expect_err("validation should fail")
        .to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("flotilla.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn config_maps_minutes_onto_operation_timeouts(valid_config: AzureConfig) {
    let cfg = AzureConfig {
        create_timeout_minutes: 45,
        ..valid_config
    };
    let timeouts = cfg.timeouts();
    assert_eq!(timeouts.create, Duration::from_secs(45 * 60));
    assert_eq!(timeouts.update, Duration::from_secs(30 * 60));
}
