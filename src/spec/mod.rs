//! Typed configuration document for a container group.
//!
//! Documents are decoded with serde and validated once by [`decode`]; the
//! rest of the crate works on the resulting [`ContainerGroupSpec`] without
//! re-checking field shapes.

mod volume;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ids::{ContainerGroupId, NetworkProfileId, UserAssignedIdentityId};

pub use volume::{
    AzureFileShare, GitRepoVolume, VolumeDocument, VolumeError, VolumeSource, VolumeSpec,
};

/// Errors raised while decoding or validating a configuration document.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// The document is not well-formed for the schema.
    #[error("invalid container group document: {0}")]
    Decode(String),
    /// A field holds a value the schema rejects.
    #[error("invalid value for `{field}`: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// Description of the problem.
        message: String,
    },
}

impl SpecError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Operating system of the containers in a group.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum OsType {
    /// Linux containers.
    #[serde(alias = "linux")]
    Linux,
    /// Windows containers.
    #[serde(alias = "windows")]
    Windows,
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linux => "Linux",
            Self::Windows => "Windows",
        })
    }
}

/// Visibility of the group's IP address.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum IpAddressType {
    /// Internet-facing address.
    #[default]
    #[serde(alias = "public")]
    Public,
    /// Address inside a virtual network.
    #[serde(alias = "private")]
    Private,
}

/// Restart behaviour for containers in the group.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum RestartPolicy {
    /// Always restart.
    #[default]
    #[serde(alias = "always")]
    Always,
    /// Never restart.
    #[serde(alias = "never")]
    Never,
    /// Restart on non-zero exit.
    #[serde(alias = "onfailure")]
    OnFailure,
}

/// Transport protocol of a port.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Protocol {
    /// TCP.
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
    /// UDP.
    #[serde(rename = "UDP")]
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        })
    }
}

/// A port and protocol pair.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PortSpec {
    /// Port number.
    pub port: u16,
    /// Protocol, defaulting to TCP.
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortSpec {
    /// Builds a port specification.
    #[must_use]
    pub const fn new(port: u16, protocol: Protocol) -> Self {
        Self { port, protocol }
    }
}

/// GPU model requested by a container.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum GpuSku {
    /// NVIDIA Tesla K80.
    K80,
    /// NVIDIA Tesla P100.
    P100,
    /// NVIDIA Tesla V100.
    V100,
}

/// Number of GPUs requested; one of 1, 2 or 4.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct GpuCount(u8);

impl GpuCount {
    /// Returns the requested count.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for GpuCount {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 | 2 | 4 => Ok(Self(value)),
            other => Err(format!("gpu count must be one of 1, 2 or 4, got {other}")),
        }
    }
}

impl From<GpuCount> for u8 {
    fn from(value: GpuCount) -> Self {
        value.0
    }
}

/// GPU request for a container.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GpuSpec {
    /// Number of GPUs.
    pub count: GpuCount,
    /// GPU model.
    pub sku: GpuSku,
}

/// URL scheme for an HTTP probe.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP.
    #[serde(alias = "Http")]
    Http,
    /// HTTP over TLS.
    #[serde(alias = "Https")]
    Https,
}

/// HTTP GET check performed by a probe.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpGetSpec {
    /// Request path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Target port.
    pub port: u16,
    /// Request scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<Scheme>,
}

/// Liveness or readiness probe. Integer settings are sent only when
/// positive.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeSpec {
    /// Command executed inside the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec: Vec<String>,
    /// HTTP check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetSpec>,
    /// Seconds before the first probe.
    #[serde(default)]
    pub initial_delay_seconds: u32,
    /// Seconds between probes.
    #[serde(default)]
    pub period_seconds: u32,
    /// Consecutive failures before the container is considered failed.
    #[serde(default)]
    pub failure_threshold: u32,
    /// Consecutive successes before the container is considered healthy.
    #[serde(default)]
    pub success_threshold: u32,
    /// Probe timeout in seconds.
    #[serde(default)]
    pub timeout_seconds: u32,
}

/// A single container in the group.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// CPU cores requested.
    pub cpu: f64,
    /// Memory requested, in GB.
    pub memory: f64,
    /// Optional GPU request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuSpec>,
    /// Ports opened on the container.
    #[serde(default)]
    pub ports: BTreeSet<PortSpec>,
    /// Plain environment variables.
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    /// Secret environment variables; values are never returned by the API.
    #[serde(default)]
    pub secure_environment_variables: BTreeMap<String, String>,
    /// Command line overriding the image entrypoint.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Volume mounts.
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    /// Liveness probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<ProbeSpec>,
    /// Readiness probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ProbeSpec>,
}

/// Managed identity assignment.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum IdentityType {
    /// System-assigned identity only.
    SystemAssigned,
    /// User-assigned identities only.
    UserAssigned,
    /// Both kinds.
    #[serde(rename = "SystemAssigned, UserAssigned")]
    SystemAssignedUserAssigned,
}

impl IdentityType {
    /// Returns true when user-assigned identities take part.
    #[must_use]
    pub const fn includes_user_assigned(self) -> bool {
        matches!(self, Self::UserAssigned | Self::SystemAssignedUserAssigned)
    }
}

/// Identity block of a container group.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IdentitySpec {
    /// Identity type.
    #[serde(rename = "type")]
    pub kind: IdentityType,
    /// User-assigned identity resource ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity_ids: Vec<String>,
}

/// DNS settings pushed into every container.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfigSpec {
    /// Name servers, in resolution order.
    pub nameservers: Vec<String>,
    /// Search domains.
    #[serde(default)]
    pub search_domains: BTreeSet<String>,
    /// Resolver options (for example `ndots:2`).
    #[serde(default)]
    pub options: BTreeSet<String>,
}

/// Log Analytics table a group writes to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum LogType {
    /// Container insights.
    ContainerInsights,
    /// Container instance logs.
    ContainerInstanceLogs,
}

/// Log Analytics workspace settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogAnalyticsSpec {
    /// Workspace id (a UUID).
    pub workspace_id: String,
    /// Workspace key. Never returned by the API.
    pub workspace_key: String,
    /// Log table; metadata is sent only when this is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_type: Option<LogType>,
    /// Extra metadata attached to log records.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Diagnostics block of a container group.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsSpec {
    /// Log Analytics workspace.
    pub log_analytics: LogAnalyticsSpec,
}

/// Credentials for pulling from a private registry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ImageRegistryCredential {
    /// Registry host.
    pub server: String,
    /// Registry user.
    pub username: String,
    /// Registry password. Never returned by the API.
    pub password: String,
}

/// Declarative description of a container group.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerGroupSpec {
    /// Group name.
    pub name: String,
    /// Resource group holding the container group.
    pub resource_group_name: String,
    /// Azure region.
    pub location: String,
    /// Operating system of the containers.
    pub os_type: OsType,
    /// Visibility of the group's IP address.
    #[serde(default)]
    pub ip_address_type: IpAddressType,
    /// Network profile for virtual network deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_profile_id: Option<String>,
    /// Restart policy.
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// DNS label for the public IP address.
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub dns_name_label: Option<String>,
    /// Managed identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentitySpec>,
    /// DNS settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<DnsConfigSpec>,
    /// Diagnostics settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticsSpec>,
    /// Containers in the group.
    pub containers: Vec<ContainerSpec>,
    /// Ports exposed on the group address. When unset, every container
    /// port is exposed; that default is deprecated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<BTreeSet<PortSpec>>,
    /// Private registry credentials.
    #[serde(default)]
    pub image_registry_credentials: Vec<ImageRegistryCredential>,
    /// Resource tags; the only field updatable in place.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Persisted view of a container group: the document as last read back plus
/// the attributes the service computes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ContainerGroupState {
    /// Resource id assigned by the service.
    pub id: ContainerGroupId,
    /// Document reconstructed from the service's response.
    pub spec: ContainerGroupSpec,
    /// Assigned IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Fully qualified domain name for the DNS label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    /// Principal of the system-assigned identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
}

/// Decodes and validates a JSON configuration document.
///
/// # Errors
///
/// Returns [`SpecError::Decode`] when the document does not match the
/// schema (including conflicting volume sources) and
/// [`SpecError::Invalid`] when a field value is rejected.
pub fn decode(document: &str) -> Result<ContainerGroupSpec, SpecError> {
    let spec: ContainerGroupSpec =
        serde_json::from_str(document).map_err(|err| SpecError::Decode(err.to_string()))?;
    spec.validate()?;
    Ok(spec)
}

/// Reads an optional string, treating `""` as absent.
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|text| !text.is_empty()))
}

/// Lower-cases a region name and strips spaces (`West Europe` →
/// `westeurope`).
#[must_use]
pub fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn require_non_empty(field: &str, value: &str) -> Result<(), SpecError> {
    if value.trim().is_empty() {
        return Err(SpecError::invalid(field, "must not be empty"));
    }
    Ok(())
}

impl ContainerGroupSpec {
    /// Validates field values that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), SpecError> {
        require_non_empty("name", &self.name)?;
        require_non_empty("resource_group_name", &self.resource_group_name)?;
        require_non_empty("location", &self.location)?;

        if let Some(profile) = &self.network_profile_id {
            NetworkProfileId::parse(profile)
                .map_err(|err| SpecError::invalid("network_profile_id", err.to_string()))?;
            if self.dns_name_label.is_some() {
                return Err(SpecError::invalid(
                    "network_profile_id",
                    "conflicts with `dns_name_label`",
                ));
            }
            if self.identity.is_some() {
                return Err(SpecError::invalid(
                    "network_profile_id",
                    "conflicts with `identity`",
                ));
            }
        }

        if let Some(identity) = &self.identity {
            for (index, id) in identity.identity_ids.iter().enumerate() {
                UserAssignedIdentityId::parse(id).map_err(|err| {
                    SpecError::invalid(format!("identity.identity_ids.{index}"), err.to_string())
                })?;
            }
        }

        if self.containers.is_empty() {
            return Err(SpecError::invalid(
                "container",
                "at least one container is required",
            ));
        }
        for (index, container) in self.containers.iter().enumerate() {
            validate_container(&format!("container.{index}"), container)?;
        }

        if let Some(ports) = &self.exposed_ports {
            validate_ports("exposed_port", ports)?;
        }

        for (index, credential) in self.image_registry_credentials.iter().enumerate() {
            let field = format!("image_registry_credential.{index}");
            require_non_empty(&format!("{field}.server"), &credential.server)?;
            require_non_empty(&format!("{field}.username"), &credential.username)?;
            require_non_empty(&format!("{field}.password"), &credential.password)?;
        }

        if let Some(diagnostics) = &self.diagnostics {
            let analytics = &diagnostics.log_analytics;
            Uuid::parse_str(&analytics.workspace_id).map_err(|err| {
                SpecError::invalid("diagnostics.log_analytics.workspace_id", err.to_string())
            })?;
            require_non_empty(
                "diagnostics.log_analytics.workspace_key",
                &analytics.workspace_key,
            )?;
        }

        if let Some(dns) = &self.dns_config {
            if dns.nameservers.is_empty() {
                return Err(SpecError::invalid(
                    "dns_config.nameservers",
                    "at least one name server is required",
                ));
            }
            for entry in dns.search_domains.iter().chain(&dns.options) {
                if entry.is_empty() || entry.contains(' ') {
                    return Err(SpecError::invalid(
                        "dns_config",
                        format!("search domains and options must be non-empty words, got {entry:?}"),
                    ));
                }
            }
        }

        Ok(())
    }
}

fn validate_ports(field: &str, ports: &BTreeSet<PortSpec>) -> Result<(), SpecError> {
    if ports.iter().any(|port| port.port == 0) {
        return Err(SpecError::invalid(field, "port must be between 1 and 65535"));
    }
    Ok(())
}

fn validate_container(field: &str, container: &ContainerSpec) -> Result<(), SpecError> {
    require_non_empty(&format!("{field}.name"), &container.name)?;
    require_non_empty(&format!("{field}.image"), &container.image)?;
    for (label, value) in [("cpu", container.cpu), ("memory", container.memory)] {
        if !value.is_finite() || value <= 0.0 {
            return Err(SpecError::invalid(
                format!("{field}.{label}"),
                format!("must be a positive number, got {value}"),
            ));
        }
    }
    validate_ports(&format!("{field}.ports"), &container.ports)?;
    for (index, command) in container.commands.iter().enumerate() {
        require_non_empty(&format!("{field}.commands.{index}"), command)?;
    }

    for (index, volume) in container.volumes.iter().enumerate() {
        let volume_field = format!("{field}.volume.{index}");
        require_non_empty(&format!("{volume_field}.name"), &volume.name)?;
        require_non_empty(&format!("{volume_field}.mount_path"), &volume.mount_path)?;
        match &volume.source {
            VolumeSource::EmptyDir => {}
            VolumeSource::GitRepo(repo) => {
                require_non_empty(&format!("{volume_field}.git_repo.url"), &repo.url)?;
            }
            VolumeSource::Secret(entries) => {
                if entries.is_empty() {
                    return Err(SpecError::invalid(
                        format!("{volume_field}.secret"),
                        "must contain at least one entry",
                    ));
                }
            }
            VolumeSource::AzureFile(share) => {
                require_non_empty(
                    &format!("{volume_field}.storage_account_key"),
                    &share.storage_account_key,
                )?;
            }
        }
    }

    for (label, probe) in [
        ("liveness_probe", &container.liveness_probe),
        ("readiness_probe", &container.readiness_probe),
    ] {
        if let Some(http) = probe.as_ref().and_then(|probe| probe.http_get.as_ref())
            && http.port == 0
        {
            return Err(SpecError::invalid(
                format!("{field}.{label}.http_get.port"),
                "port must be between 1 and 65535",
            ));
        }
    }
    Ok(())
}
