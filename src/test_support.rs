//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeArm`] is an in-memory resource manager: it stores what it is sent,
//! strips write-only values the way the real service does, and lets tests
//! script long-running operation outcomes, network profile observations and
//! failures.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::api::models::{
    ContainerGroup, ContainerNetworkInterface, ContainerNetworkInterfaceProperties,
    NetworkProfile, NetworkProfileProperties, ResourceIdentityType, SubResource, TagsPatch,
};
use crate::api::{
    ApiError, ApiFuture, ContainerGroupsApi, OperationHandle, OperationStatus, PollKind,
};
use crate::ids::{ContainerGroupId, NetworkProfileId};
use crate::spec::{
    AzureFileShare, ContainerGroupSpec, ContainerSpec, DiagnosticsSpec, DnsConfigSpec,
    GitRepoVolume, GpuCount, GpuSku, GpuSpec, HttpGetSpec, IdentitySpec, IdentityType,
    ImageRegistryCredential, IpAddressType, LogAnalyticsSpec, LogType, OsType, PortSpec,
    ProbeSpec, Protocol, RestartPolicy, Scheme, VolumeSource, VolumeSpec,
};

/// Subscription used by the shared fixtures.
pub const SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Address the fake assigns to every group.
pub const FAKE_IP_ADDRESS: &str = "20.50.0.4";

/// Kind of call recorded by [`FakeArm`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CallKind {
    /// `get_group`.
    GetGroup,
    /// `begin_create_or_update`.
    CreateOrUpdate,
    /// `update_tags`.
    UpdateTags,
    /// `begin_delete`.
    Delete,
    /// `poll_operation`.
    PollOperation,
    /// `get_network_profile`.
    GetNetworkProfile,
}

/// A call made against [`FakeArm`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiCall {
    /// Which operation was called.
    pub kind: CallKind,
    /// Resource id or status URL the call targeted.
    pub target: String,
}

#[derive(Debug, Default)]
struct FakeState {
    groups: BTreeMap<String, ContainerGroup>,
    profiles: BTreeMap<String, VecDeque<NetworkProfile>>,
    operations: VecDeque<OperationStatus>,
    failures: BTreeMap<CallKind, VecDeque<ApiError>>,
    calls: Vec<ApiCall>,
    next_operation: u32,
    omit_next_id: bool,
    provisioning: VecDeque<String>,
}

/// Scripted, in-memory implementation of [`ContainerGroupsApi`].
#[derive(Clone, Debug, Default)]
pub struct FakeArm {
    state: Arc<Mutex<FakeState>>,
}

fn group_key(id: &ContainerGroupId) -> String {
    id.to_string().to_ascii_lowercase()
}

fn profile_key(id: &NetworkProfileId) -> String {
    id.to_string().to_ascii_lowercase()
}

impl FakeArm {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `group` under `id` as if it had already been created.
    pub fn seed_group(&self, id: &ContainerGroupId, group: ContainerGroup) {
        let stored = echo(id, group);
        self.lock().groups.insert(group_key(id), stored);
    }

    /// Returns the stored group, if any.
    #[must_use]
    pub fn stored_group(&self, id: &ContainerGroupId) -> Option<ContainerGroup> {
        self.lock().groups.get(&group_key(id)).cloned()
    }

    /// Makes subsequent mutating calls return pending handles whose polls
    /// yield `statuses` in order, then `Succeeded`.
    pub fn script_operations(&self, statuses: impl IntoIterator<Item = OperationStatus>) {
        self.lock().operations.extend(statuses);
    }

    /// Queues an error for the next call of `kind`.
    pub fn fail_next(&self, kind: CallKind, error: ApiError) {
        self.lock()
            .failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    /// Scripts the container groups attached to a network profile on each
    /// successive fetch. The last observation repeats.
    pub fn script_profile(
        &self,
        profile: &NetworkProfileId,
        observations: impl IntoIterator<Item = Vec<ContainerGroupId>>,
    ) {
        let profiles = observations
            .into_iter()
            .map(|attached| network_profile(profile, &attached))
            .collect();
        self.lock().profiles.insert(profile_key(profile), profiles);
    }

    /// Makes the next successful `get_group` return the group without its
    /// `id`.
    pub fn omit_id_on_next_read(&self) {
        self.lock().omit_next_id = true;
    }

    /// Makes successive successful `get_group` calls report `states` as the
    /// provisioning state, then the stored one.
    pub fn script_provisioning<S: Into<String>>(&self, states: impl IntoIterator<Item = S>) {
        self.lock()
            .provisioning
            .extend(states.into_iter().map(Into::into));
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Counts recorded calls of `kind`.
    #[must_use]
    pub fn count(&self, kind: CallKind) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.kind == kind)
            .count()
    }

    fn begin(&self, kind: CallKind, target: String) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall { kind, target });
        match state.failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn handle(&self) -> OperationHandle {
        let mut state = self.lock();
        if state.operations.is_empty() {
            return OperationHandle::Completed;
        }
        state.next_operation = state.next_operation.saturating_add(1);
        OperationHandle::Pending {
            url: format!(
                "https://fake.management.azure.com/operations/{}",
                state.next_operation
            ),
            kind: PollKind::AsyncOperation,
            retry_after: None,
        }
    }
}

/// Builds a network profile whose interfaces belong to `attached`.
#[must_use]
pub fn network_profile(id: &NetworkProfileId, attached: &[ContainerGroupId]) -> NetworkProfile {
    NetworkProfile {
        id: Some(id.to_string()),
        properties: NetworkProfileProperties {
            container_network_interfaces: attached
                .iter()
                .enumerate()
                .map(|(index, group)| ContainerNetworkInterface {
                    id: Some(format!("{id}/containerNetworkInterfaces/nic-{index}")),
                    properties: Some(ContainerNetworkInterfaceProperties {
                        container: Some(SubResource {
                            id: Some(group.to_string()),
                        }),
                    }),
                })
                .collect(),
        },
    }
}

/// Mimics what the service stores and echoes back for a submitted group.
fn echo(id: &ContainerGroupId, mut group: ContainerGroup) -> ContainerGroup {
    group.id = Some(id.to_string());
    group.name = Some(id.name.clone());
    let location = group.location.clone().unwrap_or_default();

    if let Some(identity) = group.identity.as_mut()
        && matches!(
            identity.kind,
            ResourceIdentityType::SystemAssigned | ResourceIdentityType::SystemAssignedUserAssigned
        )
    {
        identity.principal_id = Some(String::from("11111111-2222-3333-4444-555555555555"));
        identity.tenant_id = Some(String::from("66666666-7777-8888-9999-000000000000"));
    }

    let props = &mut group.properties;
    props.provisioning_state = Some(String::from("Succeeded"));
    for credential in &mut props.image_registry_credentials {
        credential.password = None;
    }
    for container in &mut props.containers {
        for variable in &mut container.properties.environment_variables {
            variable.secure_value = None;
        }
    }
    for volume in &mut props.volumes {
        for value in volume.secret.iter_mut().flat_map(BTreeMap::values_mut) {
            *value = None;
        }
        if let Some(file) = volume.azure_file.as_mut() {
            file.storage_account_key = None;
        }
    }
    if let Some(diagnostics) = props.diagnostics.as_mut() {
        diagnostics.log_analytics.workspace_key = None;
    }
    if let Some(address) = props.ip_address.as_mut() {
        address.ip = Some(FAKE_IP_ADDRESS.to_owned());
        address.fqdn = address
            .dns_name_label
            .as_ref()
            .map(|label| format!("{label}.{location}.azurecontainer.io"));
    }
    group
}

impl ContainerGroupsApi for FakeArm {
    fn get_group<'a>(&'a self, id: &'a ContainerGroupId) -> ApiFuture<'a, ContainerGroup> {
        Box::pin(async move {
            self.begin(CallKind::GetGroup, id.to_string())?;
            let mut state = self.lock();
            let mut group = state
                .groups
                .get(&group_key(id))
                .cloned()
                .ok_or(ApiError::NotFound)?;
            if state.omit_next_id {
                state.omit_next_id = false;
                group.id = None;
            }
            if let Some(provisioning) = state.provisioning.pop_front() {
                group.properties.provisioning_state = Some(provisioning);
            }
            Ok(group)
        })
    }

    fn begin_create_or_update<'a>(
        &'a self,
        id: &'a ContainerGroupId,
        group: &'a ContainerGroup,
    ) -> ApiFuture<'a, OperationHandle> {
        Box::pin(async move {
            self.begin(CallKind::CreateOrUpdate, id.to_string())?;
            let stored = echo(id, group.clone());
            self.lock().groups.insert(group_key(id), stored);
            Ok(self.handle())
        })
    }

    fn update_tags<'a>(
        &'a self,
        id: &'a ContainerGroupId,
        tags: &'a TagsPatch,
    ) -> ApiFuture<'a, ContainerGroup> {
        Box::pin(async move {
            self.begin(CallKind::UpdateTags, id.to_string())?;
            let mut state = self.lock();
            let group = state
                .groups
                .get_mut(&group_key(id))
                .ok_or(ApiError::NotFound)?;
            group.tags = Some(tags.tags.clone());
            Ok(group.clone())
        })
    }

    fn begin_delete<'a>(&'a self, id: &'a ContainerGroupId) -> ApiFuture<'a, OperationHandle> {
        Box::pin(async move {
            self.begin(CallKind::Delete, id.to_string())?;
            self.lock()
                .groups
                .remove(&group_key(id))
                .ok_or(ApiError::NotFound)?;
            Ok(self.handle())
        })
    }

    fn poll_operation<'a>(
        &'a self,
        url: &'a str,
        _kind: PollKind,
    ) -> ApiFuture<'a, OperationStatus> {
        Box::pin(async move {
            self.begin(CallKind::PollOperation, url.to_owned())?;
            Ok(self
                .lock()
                .operations
                .pop_front()
                .unwrap_or(OperationStatus::Succeeded))
        })
    }

    fn get_network_profile<'a>(
        &'a self,
        id: &'a NetworkProfileId,
    ) -> ApiFuture<'a, NetworkProfile> {
        Box::pin(async move {
            self.begin(CallKind::GetNetworkProfile, id.to_string())?;
            let mut state = self.lock();
            let observations = state
                .profiles
                .get_mut(&profile_key(id))
                .ok_or(ApiError::NotFound)?;
            let observed = if observations.len() > 1 {
                observations.pop_front()
            } else {
                observations.front().cloned()
            };
            observed.ok_or(ApiError::NotFound)
        })
    }
}

/// Id of the group described by [`sample_spec`].
#[must_use]
pub fn sample_group_id() -> ContainerGroupId {
    ContainerGroupId::new(SUBSCRIPTION_ID, "rg1", "web")
}

/// A two-container document exercising every block of the schema.
#[must_use]
pub fn sample_spec() -> ContainerGroupSpec {
    ContainerGroupSpec {
        name: String::from("web"),
        resource_group_name: String::from("rg1"),
        location: String::from("westeurope"),
        os_type: OsType::Linux,
        ip_address_type: IpAddressType::Public,
        network_profile_id: None,
        restart_policy: RestartPolicy::OnFailure,
        dns_name_label: Some(String::from("flotilla-web")),
        identity: Some(IdentitySpec {
            kind: IdentityType::SystemAssignedUserAssigned,
            identity_ids: vec![format!(
                "/subscriptions/{SUBSCRIPTION_ID}/resourceGroups/ids/providers/Microsoft.ManagedIdentity/userAssignedIdentities/web-reader"
            )],
        }),
        dns_config: Some(DnsConfigSpec {
            nameservers: vec![String::from("1.1.1.1"), String::from("8.8.8.8")],
            search_domains: BTreeSet::from([String::from("a.com"), String::from("b.com")]),
            options: BTreeSet::from([String::from("ndots:2")]),
        }),
        diagnostics: Some(DiagnosticsSpec {
            log_analytics: LogAnalyticsSpec {
                workspace_id: String::from("6f4f5b8e-52b1-4b4a-9a59-8d1c4b1f2f11"),
                workspace_key: String::from("d29ya3NwYWNlLWtleQ=="),
                log_type: Some(LogType::ContainerInsights),
                metadata: BTreeMap::from([(String::from("team"), String::from("edge"))]),
            },
        }),
        containers: vec![app_container(), sidecar_container()],
        exposed_ports: Some(BTreeSet::from([
            PortSpec::new(80, Protocol::Tcp),
            PortSpec::new(5353, Protocol::Udp),
        ])),
        image_registry_credentials: vec![ImageRegistryCredential {
            server: String::from("registry.example.com"),
            username: String::from("puller"),
            password: String::from("hunter2"),
        }],
        tags: BTreeMap::from([(String::from("env"), String::from("test"))]),
    }
}

fn app_container() -> ContainerSpec {
    ContainerSpec {
        name: String::from("app"),
        image: String::from("nginx:1.27"),
        cpu: 1.0,
        memory: 1.5,
        gpu: None,
        ports: BTreeSet::from([
            PortSpec::new(80, Protocol::Tcp),
            PortSpec::new(443, Protocol::Tcp),
        ]),
        environment_variables: BTreeMap::from([
            (String::from("LOG_LEVEL"), String::from("info")),
            (String::from("MODE"), String::from("prod")),
        ]),
        secure_environment_variables: BTreeMap::from([(
            String::from("API_KEY"),
            String::from("s3cret"),
        )]),
        commands: vec![
            String::from("nginx"),
            String::from("-g"),
            String::from("daemon off;"),
        ],
        volumes: vec![
            VolumeSpec {
                name: String::from("files"),
                mount_path: String::from("/mnt/files"),
                read_only: true,
                source: VolumeSource::AzureFile(AzureFileShare {
                    share_name: String::from("content"),
                    storage_account_name: String::from("flotillastore"),
                    storage_account_key: String::from("c3RvcmFnZS1rZXk="),
                }),
            },
            VolumeSpec {
                name: String::from("creds"),
                mount_path: String::from("/run/creds"),
                read_only: true,
                source: VolumeSource::Secret(BTreeMap::from([(
                    String::from("token"),
                    String::from("dG9rZW4="),
                )])),
            },
        ],
        liveness_probe: Some(ProbeSpec {
            http_get: Some(HttpGetSpec {
                path: Some(String::from("/healthz")),
                port: 80,
                scheme: Some(Scheme::Http),
            }),
            initial_delay_seconds: 10,
            period_seconds: 15,
            failure_threshold: 3,
            ..ProbeSpec::default()
        }),
        readiness_probe: None,
    }
}

fn sidecar_container() -> ContainerSpec {
    ContainerSpec {
        name: String::from("sidecar"),
        image: String::from("coredns/coredns:1.11.1"),
        cpu: 0.5,
        memory: 0.5,
        gpu: GpuCount::try_from(1).ok().map(|count| GpuSpec {
            count,
            sku: GpuSku::K80,
        }),
        ports: BTreeSet::from([PortSpec::new(5353, Protocol::Udp)]),
        environment_variables: BTreeMap::new(),
        secure_environment_variables: BTreeMap::new(),
        commands: Vec::new(),
        volumes: vec![VolumeSpec {
            name: String::from("zones"),
            mount_path: String::from("/zones"),
            read_only: false,
            source: VolumeSource::GitRepo(GitRepoVolume {
                url: String::from("https://example.com/zones.git"),
                directory: Some(String::from("zones")),
                revision: Some(String::from("9f2c1e0")),
            }),
        }],
        liveness_probe: None,
        readiness_probe: Some(ProbeSpec {
            exec: vec![String::from("cat"), String::from("/tmp/ready")],
            success_threshold: 1,
            timeout_seconds: 2,
            ..ProbeSpec::default()
        }),
    }
}
