//! Rebuilds a container group document from the service's response.
//!
//! The service never returns secrets. Registry passwords, secure
//! environment values, storage account keys, secret volume contents and the
//! workspace key are carried over from the prior document when one is
//! supplied and left blank otherwise.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::api::models::{
    Container, ContainerGroup, ContainerGroupDiagnostics, ContainerGroupIdentity,
    ContainerProbe, DnsConfiguration, ImageRegistryCredential as WireCredential,
    ResourceIdentityType, Volume, VolumeMount,
};
use crate::ids::{ContainerGroupId, IdError, UserAssignedIdentityId};
use crate::spec::{
    AzureFileShare, ContainerGroupSpec, ContainerGroupState, ContainerSpec, DiagnosticsSpec,
    DnsConfigSpec, GitRepoVolume, GpuCount, GpuSpec, HttpGetSpec, IdentitySpec, IdentityType,
    ImageRegistryCredential, LogAnalyticsSpec, PortSpec, ProbeSpec, Protocol, VolumeSource,
    VolumeSpec, normalize_location,
};

/// Errors raised while flattening a response.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FlattenError {
    /// The response carries no resource id.
    #[error("response does not include a resource id")]
    MissingId,
    /// The response carries an id that does not parse.
    #[error(transparent)]
    InvalidId(#[from] IdError),
    /// A required member is absent from the response.
    #[error("response does not include `{field}`")]
    MissingField {
        /// Wire name of the missing member.
        field: &'static str,
    },
    /// A member holds a value the document cannot represent.
    #[error("response value for `{field}` is not supported: {message}")]
    Unsupported {
        /// Wire name of the member.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },
}

/// Flattens `group` into a state record, taking write-only values from
/// `prior`.
///
/// # Errors
///
/// Returns [`FlattenError`] when the response lacks an id or the operating
/// system, or carries values outside the document's domain.
pub fn flatten_container_group(
    group: &ContainerGroup,
    prior: Option<&ContainerGroupSpec>,
) -> Result<ContainerGroupState, FlattenError> {
    let raw_id = group.id.as_deref().ok_or(FlattenError::MissingId)?;
    let id = ContainerGroupId::parse(raw_id)?;
    let props = &group.properties;

    let os_type = props
        .os_type
        .or_else(|| prior.map(|spec| spec.os_type))
        .ok_or(FlattenError::MissingField { field: "osType" })?;

    let containers = props
        .containers
        .iter()
        .map(|container| {
            let prior_container = prior.and_then(|spec| {
                spec.containers
                    .iter()
                    .find(|candidate| candidate.name == container.name)
            });
            flatten_container(container, &props.volumes, prior_container)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let address = props.ip_address.as_ref();
    let exposed_ports = flatten_exposed_ports(
        address.map(|ip| ip.ports.as_slice()).unwrap_or_default(),
        &containers,
        prior,
    );

    let location = group
        .location
        .as_deref()
        .or_else(|| prior.map(|spec| spec.location.as_str()))
        .map(normalize_location)
        .unwrap_or_default();

    let spec = ContainerGroupSpec {
        name: id.name.clone(),
        resource_group_name: id.resource_group.clone(),
        location,
        os_type,
        ip_address_type: address.map(|ip| ip.kind).unwrap_or_default(),
        network_profile_id: flatten_network_profile(group, prior),
        restart_policy: props.restart_policy.unwrap_or_default(),
        dns_name_label: address
            .and_then(|ip| ip.dns_name_label.clone())
            .filter(|label| !label.is_empty()),
        identity: flatten_identity(
            group.identity.as_ref(),
            prior.and_then(|spec| spec.identity.as_ref()),
        )?,
        dns_config: props.dns_config.as_ref().map(flatten_dns_config),
        diagnostics: props.diagnostics.as_ref().map(|diagnostics| {
            flatten_diagnostics(diagnostics, prior.and_then(|spec| spec.diagnostics.as_ref()))
        }),
        containers,
        exposed_ports,
        image_registry_credentials: flatten_credentials(
            &props.image_registry_credentials,
            prior.map(|spec| spec.image_registry_credentials.as_slice()),
        ),
        tags: group.tags.clone().unwrap_or_default(),
    };

    Ok(ContainerGroupState {
        id,
        spec,
        ip_address: address.and_then(|ip| ip.ip.clone()),
        fqdn: address.and_then(|ip| ip.fqdn.clone()),
        principal_id: group
            .identity
            .as_ref()
            .and_then(|identity| identity.principal_id.clone()),
    })
}

fn port_spec(port: u16, protocol: Option<Protocol>) -> PortSpec {
    PortSpec::new(port, protocol.unwrap_or_default())
}

/// Returns `None` when the prior document left exposed ports unset and the
/// service exposes exactly the container ports.
fn flatten_exposed_ports(
    ports: &[crate::api::models::GroupPort],
    containers: &[ContainerSpec],
    prior: Option<&ContainerGroupSpec>,
) -> Option<BTreeSet<PortSpec>> {
    let exposed: BTreeSet<PortSpec> = ports
        .iter()
        .map(|port| port_spec(port.port, port.protocol))
        .collect();
    let declared: BTreeSet<PortSpec> = containers
        .iter()
        .flat_map(|container| container.ports.iter().copied())
        .collect();
    let prior_unset = prior.is_none_or(|spec| spec.exposed_ports.is_none());
    if prior_unset && exposed == declared {
        return None;
    }
    Some(exposed)
}

fn flatten_network_profile(
    group: &ContainerGroup,
    prior: Option<&ContainerGroupSpec>,
) -> Option<String> {
    let returned = group.properties.network_profile.as_ref()?.id.clone();
    let prior_id = prior.and_then(|spec| spec.network_profile_id.as_ref());
    match prior_id {
        Some(id) if id.eq_ignore_ascii_case(&returned) => Some(id.clone()),
        _ => Some(returned),
    }
}

fn flatten_container(
    container: &Container,
    volumes: &[Volume],
    prior: Option<&ContainerSpec>,
) -> Result<ContainerSpec, FlattenError> {
    let props = &container.properties;
    let requests = &props.resources.requests;

    let gpu = requests
        .gpu
        .map(|gpu| {
            GpuCount::try_from(gpu.count)
                .map(|count| GpuSpec {
                    count,
                    sku: gpu.sku,
                })
                .map_err(|message| FlattenError::Unsupported {
                    field: "gpu.count",
                    message,
                })
        })
        .transpose()?;

    let mut environment_variables = BTreeMap::new();
    let mut secure_environment_variables = BTreeMap::new();
    for variable in &props.environment_variables {
        match &variable.value {
            Some(value) => {
                environment_variables.insert(variable.name.clone(), value.clone());
            }
            None => {
                let remembered = prior
                    .and_then(|spec| spec.secure_environment_variables.get(&variable.name))
                    .cloned()
                    .unwrap_or_default();
                secure_environment_variables.insert(variable.name.clone(), remembered);
            }
        }
    }

    Ok(ContainerSpec {
        name: container.name.clone(),
        image: props.image.clone(),
        cpu: requests.cpu,
        memory: requests.memory_in_gb,
        gpu,
        ports: props
            .ports
            .iter()
            .map(|port| port_spec(port.port, port.protocol))
            .collect(),
        environment_variables,
        secure_environment_variables,
        commands: props.command.clone(),
        volumes: props
            .volume_mounts
            .iter()
            .map(|mount| flatten_volume(mount, volumes, prior))
            .collect(),
        liveness_probe: props.liveness_probe.as_ref().map(flatten_probe),
        readiness_probe: props.readiness_probe.as_ref().map(flatten_probe),
    })
}

fn flatten_volume(mount: &VolumeMount, volumes: &[Volume], prior: Option<&ContainerSpec>) -> VolumeSpec {
    let prior_source = prior
        .and_then(|spec| spec.volumes.iter().find(|volume| volume.name == mount.name))
        .map(|volume| &volume.source);
    let group_volume = volumes.iter().find(|volume| volume.name == mount.name);

    let source = match group_volume {
        Some(Volume {
            azure_file: Some(file),
            ..
        }) => {
            let storage_account_key = match prior_source {
                Some(VolumeSource::AzureFile(share)) => share.storage_account_key.clone(),
                _ => String::new(),
            };
            VolumeSource::AzureFile(AzureFileShare {
                share_name: file.share_name.clone(),
                storage_account_name: file.storage_account_name.clone(),
                storage_account_key,
            })
        }
        Some(Volume {
            empty_dir: Some(_), ..
        }) => VolumeSource::EmptyDir,
        Some(Volume {
            git_repo: Some(repo),
            ..
        }) => VolumeSource::GitRepo(GitRepoVolume {
            url: repo.repository.clone(),
            directory: repo.directory.clone(),
            revision: repo.revision.clone(),
        }),
        Some(Volume {
            secret: Some(entries),
            ..
        }) => match prior_source {
            Some(VolumeSource::Secret(remembered)) => VolumeSource::Secret(remembered.clone()),
            _ => VolumeSource::Secret(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone().unwrap_or_default()))
                    .collect(),
            ),
        },
        _ => match prior_source {
            Some(VolumeSource::Secret(remembered)) => VolumeSource::Secret(remembered.clone()),
            _ => VolumeSource::Secret(BTreeMap::new()),
        },
    };

    VolumeSpec {
        name: mount.name.clone(),
        mount_path: mount.mount_path.clone(),
        read_only: mount.read_only.unwrap_or_default(),
        source,
    }
}

fn flatten_probe(probe: &ContainerProbe) -> ProbeSpec {
    ProbeSpec {
        exec: probe
            .exec
            .as_ref()
            .map(|exec| exec.command.clone())
            .unwrap_or_default(),
        http_get: probe.http_get.as_ref().map(|http| HttpGetSpec {
            path: http.path.clone(),
            port: http.port,
            scheme: http.scheme,
        }),
        initial_delay_seconds: probe.initial_delay_seconds.unwrap_or_default(),
        period_seconds: probe.period_seconds.unwrap_or_default(),
        failure_threshold: probe.failure_threshold.unwrap_or_default(),
        success_threshold: probe.success_threshold.unwrap_or_default(),
        timeout_seconds: probe.timeout_seconds.unwrap_or_default(),
    }
}

fn canonical_identity(raw: &str) -> Result<String, IdError> {
    UserAssignedIdentityId::parse(raw).map(|id| id.to_string())
}

fn flatten_identity(
    identity: Option<&ContainerGroupIdentity>,
    prior: Option<&IdentitySpec>,
) -> Result<Option<IdentitySpec>, FlattenError> {
    let Some(identity) = identity else {
        return Ok(None);
    };
    let kind = match identity.kind {
        ResourceIdentityType::None => return Ok(None),
        ResourceIdentityType::SystemAssigned => IdentityType::SystemAssigned,
        ResourceIdentityType::UserAssigned => IdentityType::UserAssigned,
        ResourceIdentityType::SystemAssignedUserAssigned => {
            IdentityType::SystemAssignedUserAssigned
        }
    };

    let returned = identity
        .user_assigned_identities
        .iter()
        .flat_map(BTreeMap::keys)
        .map(|raw| canonical_identity(raw))
        .collect::<Result<BTreeSet<_>, _>>()?;

    let prior_ids = prior.map(|spec| spec.identity_ids.as_slice()).unwrap_or_default();
    let prior_set = prior_ids
        .iter()
        .map(|raw| canonical_identity(raw))
        .collect::<Result<BTreeSet<_>, _>>();

    let identity_ids = match prior_set {
        Ok(set) if set == returned && set.len() == prior_ids.len() => prior_ids.to_vec(),
        _ => returned.into_iter().collect(),
    };

    Ok(Some(IdentitySpec { kind, identity_ids }))
}

fn split_words(joined: Option<&str>) -> BTreeSet<String> {
    joined
        .unwrap_or_default()
        .split(' ')
        .filter(|word| !word.is_empty())
        .map(str::to_owned)
        .collect()
}

fn flatten_dns_config(dns: &DnsConfiguration) -> DnsConfigSpec {
    DnsConfigSpec {
        nameservers: dns.name_servers.clone(),
        search_domains: split_words(dns.search_domains.as_deref()),
        options: split_words(dns.options.as_deref()),
    }
}

fn flatten_diagnostics(
    diagnostics: &ContainerGroupDiagnostics,
    prior: Option<&DiagnosticsSpec>,
) -> DiagnosticsSpec {
    let analytics = &diagnostics.log_analytics;
    let workspace_key = prior
        .map(|spec| spec.log_analytics.workspace_key.clone())
        .filter(|key| !key.is_empty())
        .unwrap_or_default();
    DiagnosticsSpec {
        log_analytics: LogAnalyticsSpec {
            workspace_id: analytics.workspace_id.clone(),
            workspace_key,
            log_type: analytics.log_type,
            metadata: analytics.metadata.clone().unwrap_or_default(),
        },
    }
}

fn flatten_credentials(
    returned: &[WireCredential],
    prior: Option<&[ImageRegistryCredential]>,
) -> Vec<ImageRegistryCredential> {
    returned
        .iter()
        .enumerate()
        .map(|(index, credential)| {
            let password = prior
                .and_then(|credentials| credentials.get(index))
                .filter(|old| old.server == credential.server)
                .map(|old| old.password.clone())
                .unwrap_or_default();
            ImageRegistryCredential {
                server: credential.server.clone(),
                username: credential.username.clone(),
                password,
            }
        })
        .collect()
}
