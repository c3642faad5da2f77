//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::provider::OperationTimeouts;

const SECONDS_PER_MINUTE: u64 = 60;

/// Azure settings derived from environment variables, configuration files,
/// and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "AZURE")]
pub struct AzureConfig {
    /// Subscription that owns the container groups. Required.
    pub subscription_id: String,
    /// Bearer token for the resource manager. Acquiring it is left to the
    /// caller (for example `az account get-access-token`). Required.
    pub access_token: String,
    /// Resource manager endpoint. Defaults to the public cloud.
    #[ortho_config(default = "https://management.azure.com".to_owned())]
    pub resource_manager_endpoint: String,
    /// Minutes allowed for a create, including the long-running operation.
    #[ortho_config(default = 30)]
    pub create_timeout_minutes: u64,
    /// Minutes allowed for a read.
    #[ortho_config(default = 5)]
    pub read_timeout_minutes: u64,
    /// Minutes allowed for a tags update.
    #[ortho_config(default = 30)]
    pub update_timeout_minutes: u64,
    /// Minutes allowed for a delete, including the network profile detach
    /// wait.
    #[ortho_config(default = 30)]
    pub delete_timeout_minutes: u64,
    /// Seconds between long-running operation polls when the service does
    /// not send `Retry-After`.
    #[ortho_config(default = 10)]
    pub operation_poll_interval_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl AzureConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [azure] in flotilla.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero: set {} or {} in [azure] of flotilla.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("flotilla")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidValue`] when a duration is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.subscription_id,
            &FieldMetadata::new(
                "Azure subscription ID",
                "AZURE_SUBSCRIPTION_ID",
                "subscription_id",
            ),
        )?;
        Self::require_field(
            &self.access_token,
            &FieldMetadata::new(
                "resource manager access token",
                "AZURE_ACCESS_TOKEN",
                "access_token",
            ),
        )?;
        Self::require_field(
            &self.resource_manager_endpoint,
            &FieldMetadata::new(
                "resource manager endpoint",
                "AZURE_RESOURCE_MANAGER_ENDPOINT",
                "resource_manager_endpoint",
            ),
        )?;
        for (value, metadata) in [
            (
                self.create_timeout_minutes,
                FieldMetadata::new(
                    "create timeout",
                    "AZURE_CREATE_TIMEOUT_MINUTES",
                    "create_timeout_minutes",
                ),
            ),
            (
                self.read_timeout_minutes,
                FieldMetadata::new(
                    "read timeout",
                    "AZURE_READ_TIMEOUT_MINUTES",
                    "read_timeout_minutes",
                ),
            ),
            (
                self.update_timeout_minutes,
                FieldMetadata::new(
                    "update timeout",
                    "AZURE_UPDATE_TIMEOUT_MINUTES",
                    "update_timeout_minutes",
                ),
            ),
            (
                self.delete_timeout_minutes,
                FieldMetadata::new(
                    "delete timeout",
                    "AZURE_DELETE_TIMEOUT_MINUTES",
                    "delete_timeout_minutes",
                ),
            ),
            (
                self.operation_poll_interval_secs,
                FieldMetadata::new(
                    "operation poll interval",
                    "AZURE_OPERATION_POLL_INTERVAL_SECS",
                    "operation_poll_interval_secs",
                ),
            ),
        ] {
            Self::require_positive(value, &metadata)?;
        }
        Ok(())
    }

    /// Returns the per-operation timeouts.
    #[must_use]
    pub const fn timeouts(&self) -> OperationTimeouts {
        OperationTimeouts {
            create: minutes(self.create_timeout_minutes),
            read: minutes(self.read_timeout_minutes),
            update: minutes(self.update_timeout_minutes),
            delete: minutes(self.delete_timeout_minutes),
        }
    }

    /// Returns the fallback interval between operation polls.
    #[must_use]
    pub const fn operation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.operation_poll_interval_secs)
    }
}

const fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(SECONDS_PER_MINUTE))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value that cannot be used.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> AzureConfig {
        AzureConfig {
            subscription_id: String::from("00000000-0000-0000-0000-000000000000"),
            access_token: String::from("token"),
            resource_manager_endpoint: String::from("https://management.azure.com"),
            create_timeout_minutes: 30,
            read_timeout_minutes: 5,
            update_timeout_minutes: 30,
            delete_timeout_minutes: 30,
            operation_poll_interval_secs: 10,
        }
    }

    #[rstest]
    fn valid_config_passes(config: AzureConfig) {
        assert_eq!(config.validate(), Ok(()));
    }

    #[rstest]
    fn missing_token_names_env_var(mut config: AzureConfig) {
        config.access_token = String::from("  ");
        let err = config.validate().expect_err("blank token should fail");
        let message = err.to_string();
        assert!(message.contains("AZURE_ACCESS_TOKEN"), "{message}");
        assert!(message.contains("access_token"), "{message}");
    }

    #[rstest]
    fn zero_timeout_is_rejected(mut config: AzureConfig) {
        config.delete_timeout_minutes = 0;
        let err = config.validate().expect_err("zero timeout should fail");
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        assert!(err.to_string().contains("AZURE_DELETE_TIMEOUT_MINUTES"));
    }

    #[rstest]
    fn converts_minutes_to_timeouts(config: AzureConfig) {
        let timeouts = config.timeouts();
        assert_eq!(timeouts.read, Duration::from_secs(300));
        assert_eq!(timeouts.delete, Duration::from_secs(1800));
        assert_eq!(config.operation_poll_interval(), Duration::from_secs(10));
    }
}
