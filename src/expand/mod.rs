//! Builds the API request body for a container group from its document.
//!
//! Expansion is pure: every check here runs before the provider makes a
//! network call.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::warn;

use crate::api::models::{
    AzureFileVolume, Container, ContainerExec, ContainerGroup, ContainerGroupDiagnostics,
    ContainerGroupIdentity, ContainerGroupProperties, ContainerHttpGet, ContainerPort,
    ContainerProbe, ContainerProperties, DnsConfiguration, EmptyDirVolume, EnvironmentVariable,
    GitRepoVolume, GpuResource, GroupPort, ImageRegistryCredential, IpAddress, LogAnalytics,
    NetworkProfileReference, ResourceIdentityType, ResourceRequests, ResourceRequirements,
    UserAssignedIdentity, Volume, VolumeMount,
};
use crate::spec::{
    self, ContainerGroupSpec, ContainerSpec, DiagnosticsSpec, DnsConfigSpec, IdentitySpec,
    IdentityType, OsType, PortSpec, ProbeSpec, Protocol, SpecError, VolumeSource, VolumeSpec,
};

/// Errors raised while expanding a document into a request body.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExpandError {
    /// The document failed to decode or validate.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// A group-level port has no matching container port.
    #[error(
        "Port {port}/{protocol} is not exposed on any individual container in the container group.\nAn exposed_ports block contains {port}/{protocol}, but no individual container has a ports block with the same port and protocol. Any ports exposed on the container group must also be exposed on an individual container."
    )]
    PortNotExposed {
        /// Offending port number.
        port: u16,
        /// Offending protocol.
        protocol: Protocol,
    },
    /// A network profile was requested for a non-Linux group.
    #[error("Currently only Linux containers can be deployed to virtual networks (os_type is {os_type})")]
    NetworkProfileRequiresLinux {
        /// Requested operating system.
        os_type: OsType,
    },
}

/// Decodes a JSON document and expands it.
///
/// # Errors
///
/// Returns [`ExpandError::Spec`] when the document is invalid, including
/// conflicting volume sources, and the other variants as
/// [`expand_container_group`] does.
pub fn expand_document(document: &str) -> Result<ContainerGroup, ExpandError> {
    let group = spec::decode(document)?;
    expand_container_group(&group)
}

/// Expands a validated document into the create-or-update request body.
///
/// # Errors
///
/// Returns [`ExpandError::PortNotExposed`] when an exposed port has no
/// matching container port and
/// [`ExpandError::NetworkProfileRequiresLinux`] when a network profile is
/// combined with Windows containers.
pub fn expand_container_group(spec: &ContainerGroupSpec) -> Result<ContainerGroup, ExpandError> {
    let network_profile = match &spec.network_profile_id {
        Some(_) if spec.os_type != OsType::Linux => {
            return Err(ExpandError::NetworkProfileRequiresLinux {
                os_type: spec.os_type,
            });
        }
        Some(id) => Some(NetworkProfileReference { id: id.clone() }),
        None => None,
    };

    let mut candidates: Vec<PortSpec> = Vec::new();
    let mut volumes: Vec<Volume> = Vec::new();
    let mut empty_dirs: BTreeSet<&str> = BTreeSet::new();
    let mut containers = Vec::with_capacity(spec.containers.len());

    for container in &spec.containers {
        candidates.extend(container.ports.iter().copied());
        for volume in &container.volumes {
            if volume.source.is_empty_dir() && !empty_dirs.insert(volume.name.as_str()) {
                continue;
            }
            volumes.push(expand_volume(volume));
        }
        containers.push(expand_container(container));
    }

    let ports = expand_group_ports(spec.exposed_ports.as_ref(), &candidates)?;

    Ok(ContainerGroup {
        id: None,
        name: Some(spec.name.clone()),
        location: Some(spec::normalize_location(&spec.location)),
        tags: Some(spec.tags.clone()),
        identity: spec.identity.as_ref().map(expand_identity),
        properties: ContainerGroupProperties {
            provisioning_state: None,
            containers,
            image_registry_credentials: spec
                .image_registry_credentials
                .iter()
                .map(|credential| ImageRegistryCredential {
                    server: credential.server.clone(),
                    username: credential.username.clone(),
                    password: Some(credential.password.clone()),
                })
                .collect(),
            restart_policy: Some(spec.restart_policy),
            ip_address: Some(IpAddress {
                ports,
                kind: spec.ip_address_type,
                ip: None,
                dns_name_label: spec
                    .dns_name_label
                    .as_ref()
                    .filter(|label| !label.is_empty())
                    .cloned(),
                fqdn: None,
            }),
            os_type: Some(spec.os_type),
            volumes,
            diagnostics: spec.diagnostics.as_ref().map(expand_diagnostics),
            network_profile,
            dns_config: spec.dns_config.as_ref().map(expand_dns_config),
        },
    })
}

fn expand_group_ports(
    exposed: Option<&BTreeSet<PortSpec>>,
    candidates: &[PortSpec],
) -> Result<Vec<GroupPort>, ExpandError> {
    let available: BTreeSet<PortSpec> = candidates.iter().copied().collect();
    let selected: Vec<PortSpec> = match exposed {
        Some(exposed) => {
            if let Some(missing) = exposed.iter().find(|port| !available.contains(port)) {
                return Err(ExpandError::PortNotExposed {
                    port: missing.port,
                    protocol: missing.protocol,
                });
            }
            exposed.iter().copied().collect()
        }
        None => default_group_ports(candidates, available.len()),
    };

    Ok(selected
        .into_iter()
        .map(|port| GroupPort {
            protocol: Some(port.protocol),
            port: port.port,
        })
        .collect())
}

/// Every container port, in declaration order and without duplicates.
fn default_group_ports(candidates: &[PortSpec], distinct: usize) -> Vec<PortSpec> {
    if distinct > 0 {
        warn!(
            ports = distinct,
            "exposed_ports is unset; exposing every container port on the group is deprecated and will be removed in the next major version"
        );
    }
    let mut seen = BTreeSet::new();
    candidates
        .iter()
        .copied()
        .filter(|port| seen.insert(*port))
        .collect()
}

fn expand_container(container: &ContainerSpec) -> Container {
    Container {
        name: container.name.clone(),
        properties: ContainerProperties {
            image: container.image.clone(),
            command: container.commands.clone(),
            ports: container
                .ports
                .iter()
                .map(|port| ContainerPort {
                    port: port.port,
                    protocol: Some(port.protocol),
                })
                .collect(),
            environment_variables: expand_environment(
                &container.environment_variables,
                &container.secure_environment_variables,
            ),
            resources: ResourceRequirements {
                requests: ResourceRequests {
                    memory_in_gb: container.memory,
                    cpu: container.cpu,
                    gpu: container.gpu.map(|gpu| GpuResource {
                        count: gpu.count.get(),
                        sku: gpu.sku,
                    }),
                },
            },
            volume_mounts: container
                .volumes
                .iter()
                .map(|volume| VolumeMount {
                    name: volume.name.clone(),
                    mount_path: volume.mount_path.clone(),
                    read_only: Some(volume.read_only),
                })
                .collect(),
            liveness_probe: container.liveness_probe.as_ref().map(expand_probe),
            readiness_probe: container.readiness_probe.as_ref().map(expand_probe),
        },
    }
}

/// Plain variables first, then secure ones; each group is ordered by name.
fn expand_environment(
    plain: &BTreeMap<String, String>,
    secure: &BTreeMap<String, String>,
) -> Vec<EnvironmentVariable> {
    let plain_entries = plain.iter().map(|(name, value)| EnvironmentVariable {
        name: name.clone(),
        value: Some(value.clone()),
        secure_value: None,
    });
    let secure_entries = secure.iter().map(|(name, value)| EnvironmentVariable {
        name: name.clone(),
        value: None,
        secure_value: Some(value.clone()),
    });
    plain_entries.chain(secure_entries).collect()
}

fn expand_volume(volume: &VolumeSpec) -> Volume {
    let mut expanded = Volume {
        name: volume.name.clone(),
        ..Volume::default()
    };
    match &volume.source {
        VolumeSource::EmptyDir => expanded.empty_dir = Some(EmptyDirVolume {}),
        VolumeSource::GitRepo(repo) => {
            expanded.git_repo = Some(GitRepoVolume {
                directory: repo.directory.clone().filter(|dir| !dir.is_empty()),
                repository: repo.url.clone(),
                revision: repo.revision.clone().filter(|rev| !rev.is_empty()),
            });
        }
        VolumeSource::Secret(entries) => {
            expanded.secret = Some(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Some(value.clone())))
                    .collect(),
            );
        }
        VolumeSource::AzureFile(share) => {
            expanded.azure_file = Some(AzureFileVolume {
                share_name: share.share_name.clone(),
                read_only: Some(volume.read_only),
                storage_account_name: share.storage_account_name.clone(),
                storage_account_key: Some(share.storage_account_key.clone()),
            });
        }
    }
    expanded
}

fn positive(value: u32) -> Option<u32> {
    (value > 0).then_some(value)
}

fn expand_probe(probe: &ProbeSpec) -> ContainerProbe {
    ContainerProbe {
        exec: (!probe.exec.is_empty()).then(|| ContainerExec {
            command: probe.exec.clone(),
        }),
        http_get: probe.http_get.as_ref().map(|http| ContainerHttpGet {
            path: http.path.clone(),
            port: http.port,
            scheme: http.scheme,
        }),
        initial_delay_seconds: positive(probe.initial_delay_seconds),
        period_seconds: positive(probe.period_seconds),
        failure_threshold: positive(probe.failure_threshold),
        success_threshold: positive(probe.success_threshold),
        timeout_seconds: positive(probe.timeout_seconds),
    }
}

fn expand_identity(identity: &IdentitySpec) -> ContainerGroupIdentity {
    let kind = match identity.kind {
        IdentityType::SystemAssigned => ResourceIdentityType::SystemAssigned,
        IdentityType::UserAssigned => ResourceIdentityType::UserAssigned,
        IdentityType::SystemAssignedUserAssigned => ResourceIdentityType::SystemAssignedUserAssigned,
    };
    let user_assigned_identities = identity.kind.includes_user_assigned().then(|| {
        identity
            .identity_ids
            .iter()
            .map(|id| (id.clone(), UserAssignedIdentity::default()))
            .collect()
    });
    ContainerGroupIdentity {
        kind,
        principal_id: None,
        tenant_id: None,
        user_assigned_identities,
    }
}

fn expand_diagnostics(diagnostics: &DiagnosticsSpec) -> ContainerGroupDiagnostics {
    let analytics = &diagnostics.log_analytics;
    ContainerGroupDiagnostics {
        log_analytics: LogAnalytics {
            workspace_id: analytics.workspace_id.clone(),
            workspace_key: Some(analytics.workspace_key.clone()),
            log_type: analytics.log_type,
            metadata: analytics.log_type.map(|_| analytics.metadata.clone()),
        },
    }
}

fn join_words(words: &BTreeSet<String>) -> Option<String> {
    (!words.is_empty()).then(|| words.iter().map(String::as_str).collect::<Vec<_>>().join(" "))
}

fn expand_dns_config(dns: &DnsConfigSpec) -> DnsConfiguration {
    DnsConfiguration {
        name_servers: dns.nameservers.clone(),
        search_domains: join_words(&dns.search_domains),
        options: join_words(&dns.options),
    }
}

#[cfg(test)]
mod tests;
