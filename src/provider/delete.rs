//! Delete and the network profile detach wait.
//!
//! A group deployed into a virtual network keeps a container network
//! interface on its network profile for a while after the delete operation
//! reports success. Deleting the profile before the interface is released
//! fails, so delete waits until the profile has stopped referencing the group
//! several times in a row.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::api::models::NetworkProfile;
use crate::api::{ApiError, ContainerGroupsApi};
use crate::ids::{ContainerGroupId, IdError, NetworkProfileId};
use crate::wait::{Observation, PollPolicy, WaitError, poll_until};

use super::{ContainerGroupProvider, Operation, ProviderError, bounded};

/// Whether a network profile still references a container group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttachmentState {
    /// An interface on the profile belongs to the group.
    Attached,
    /// No interface on the profile belongs to the group.
    Detached,
}

impl AttachmentState {
    /// Inspects `profile` for interfaces owned by `group`. Ownership is
    /// matched on resource group (case-insensitively) and group name.
    ///
    /// # Errors
    ///
    /// Returns [`IdError`] when an interface references a container that is
    /// not a container group id.
    pub fn observe(profile: &NetworkProfile, group: &ContainerGroupId) -> Result<Self, IdError> {
        for interface in &profile.properties.container_network_interfaces {
            let Some(container) = interface
                .properties
                .as_ref()
                .and_then(|props| props.container.as_ref())
                .and_then(|container| container.id.as_deref())
            else {
                continue;
            };
            let owner = ContainerGroupId::parse(container)?;
            if owner.same_group(&group.resource_group, &group.name) {
                return Ok(Self::Attached);
            }
        }
        Ok(Self::Detached)
    }

    /// Returns the state name used in logs and timeout errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attached => "Attached",
            Self::Detached => "Detached",
        }
    }
}

#[derive(Debug)]
enum RefreshError {
    Api(ApiError),
    Id(IdError),
}

impl RefreshError {
    fn describe(&self) -> String {
        match self {
            Self::Api(err) => err.to_string(),
            Self::Id(err) => err.to_string(),
        }
    }
}

impl<A: ContainerGroupsApi> ContainerGroupProvider<A> {
    /// Deletes the group and, when it was attached to a network profile,
    /// waits for the profile to release it.
    ///
    /// A group that no longer exists is treated as deleted without issuing
    /// a delete call.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Api`] when the pre-fetch or delete call
    /// fails, [`ProviderError::Operation`] when the delete operation fails,
    /// [`ProviderError::DetachWait`] when the group is gone but the profile
    /// still references it and [`ProviderError::Timeout`] when the delete
    /// budget is exhausted.
    #[tracing::instrument(
        name = "provider::delete",
        skip_all,
        fields(group = %id.name, resource_group = %id.resource_group)
    )]
    pub async fn delete(&self, id: &ContainerGroupId) -> Result<(), ProviderError> {
        let started = Instant::now();
        let budget = self.timeouts.delete;
        let profile = bounded(Operation::Delete, id, budget, async {
            let existing = match self.api.get_group(id).await {
                Ok(group) => group,
                Err(ApiError::NotFound) => {
                    debug!("container group already gone");
                    return Ok(None);
                }
                Err(err) => return Err(ProviderError::api(Operation::Delete, id, err)),
            };
            let profile = existing
                .properties
                .network_profile
                .as_ref()
                .map(|reference| NetworkProfileId::parse(&reference.id))
                .transpose()?;

            match self.api.begin_delete(id).await {
                Ok(handle) => {
                    self.wait_for_operation(Operation::Delete, id, handle)
                        .await?;
                }
                Err(ApiError::NotFound) => debug!("container group vanished before delete"),
                Err(err) => return Err(ProviderError::api(Operation::Delete, id, err)),
            }
            info!("container group deleted");
            Ok(profile)
        })
        .await?;

        match profile {
            Some(profile_id) => {
                let remaining = budget.saturating_sub(started.elapsed());
                self.wait_for_detach(id, &profile_id, remaining).await
            }
            None => Ok(()),
        }
    }

    async fn wait_for_detach(
        &self,
        id: &ContainerGroupId,
        profile_id: &NetworkProfileId,
        remaining: Duration,
    ) -> Result<(), ProviderError> {
        let policy = PollPolicy {
            interval: self.detach_poll_interval,
            continuous_target_occurrence: self.detach_continuous_occurrences,
            timeout: remaining,
        };
        debug!(profile = %profile_id, "waiting for network profile to release group");

        poll_until(policy, move || self.observe_profile(id, profile_id))
            .await
            .map_err(|err| ProviderError::DetachWait {
                name: id.name.clone(),
                resource_group: id.resource_group.clone(),
                profile: profile_id.to_string(),
                reason: match err {
                    WaitError::Timeout {
                        timeout,
                        last_state,
                    } => format!("timed out after {timeout:?} (last state: {last_state})"),
                    WaitError::Refresh(refresh) => refresh.describe(),
                },
            })
    }

    async fn observe_profile(
        &self,
        id: &ContainerGroupId,
        profile_id: &NetworkProfileId,
    ) -> Result<Observation<()>, RefreshError> {
        let profile = self
            .api
            .get_network_profile(profile_id)
            .await
            .map_err(RefreshError::Api)?;
        match AttachmentState::observe(&profile, id).map_err(RefreshError::Id)? {
            AttachmentState::Detached => Ok(Observation::Target(())),
            state @ AttachmentState::Attached => Ok(Observation::Pending(state.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::NetworkProfileProperties;
    use crate::test_support::network_profile;
    use rstest::rstest;

    fn profile_id() -> NetworkProfileId {
        NetworkProfileId::new("sub", "net", "aci-profile")
    }

    #[rstest]
    #[case("rg1", AttachmentState::Attached)]
    #[case("RG1", AttachmentState::Attached)]
    #[case("rg2", AttachmentState::Detached)]
    fn resource_group_matches_case_insensitively(
        #[case] resource_group: &str,
        #[case] expected: AttachmentState,
    ) {
        let attached = ContainerGroupId::new("sub", resource_group, "web");
        let profile = network_profile(&profile_id(), &[attached]);
        let target = ContainerGroupId::new("sub", "rg1", "web");
        assert_eq!(AttachmentState::observe(&profile, &target), Ok(expected));
    }

    #[rstest]
    fn group_name_must_match() {
        let profile = network_profile(
            &profile_id(),
            &[ContainerGroupId::new("sub", "rg1", "api")],
        );
        let target = ContainerGroupId::new("sub", "rg1", "web");
        assert_eq!(
            AttachmentState::observe(&profile, &target),
            Ok(AttachmentState::Detached)
        );
    }

    #[rstest]
    fn empty_profile_is_detached() {
        let profile = NetworkProfile {
            id: None,
            properties: NetworkProfileProperties::default(),
        };
        let target = ContainerGroupId::new("sub", "rg1", "web");
        assert_eq!(
            AttachmentState::observe(&profile, &target),
            Ok(AttachmentState::Detached)
        );
    }

    #[rstest]
    fn malformed_container_reference_is_an_error() {
        let mut profile = network_profile(
            &profile_id(),
            &[ContainerGroupId::new("sub", "rg1", "web")],
        );
        for interface in &mut profile.properties.container_network_interfaces {
            if let Some(container) = interface
                .properties
                .as_mut()
                .and_then(|props| props.container.as_mut())
            {
                container.id = Some(String::from("not-an-id"));
            }
        }
        let target = ContainerGroupId::new("sub", "rg1", "web");
        assert!(AttachmentState::observe(&profile, &target).is_err());
    }
}
