//! Create, read, update, delete and import for container groups.
//!
//! [`ContainerGroupProvider`] drives a [`ContainerGroupsApi`] through the
//! lifecycle: documents are validated and expanded before any request is
//! made, long-running operations are polled to completion and every
//! operation is bounded by its timeout.

mod delete;
mod error;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::api::models::{ContainerGroup, TagsPatch};
use crate::api::{ApiError, ContainerGroupsApi, OperationHandle, OperationStatus};
use crate::expand::expand_container_group;
use crate::flatten::flatten_container_group;
use crate::ids::ContainerGroupId;
use crate::spec::{ContainerGroupSpec, ContainerGroupState};

pub use delete::AttachmentState;
pub use error::ProviderError;

const SECONDS_PER_MINUTE: u64 = 60;
const DEFAULT_OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DETACH_POLL_INTERVAL: Duration = Duration::from_secs(15);
const DETACH_CONTINUOUS_OCCURRENCES: u32 = 5;

/// Lifecycle operation, used in errors and log fields.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// Create or replace.
    Create,
    /// Refresh from the service.
    Read,
    /// In-place tags update.
    Update,
    /// Delete and wait for detachment.
    Delete,
    /// Adopt an existing group.
    Import,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Import => "import",
        })
    }
}

/// Time budget for each lifecycle operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OperationTimeouts {
    /// Budget for create, including the long-running operation.
    pub create: Duration,
    /// Budget for read and import.
    pub read: Duration,
    /// Budget for a tags update.
    pub update: Duration,
    /// Budget for delete, including the detach wait.
    pub delete: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * SECONDS_PER_MINUTE),
            read: Duration::from_secs(5 * SECONDS_PER_MINUTE),
            update: Duration::from_secs(30 * SECONDS_PER_MINUTE),
            delete: Duration::from_secs(30 * SECONDS_PER_MINUTE),
        }
    }
}

/// Container group lifecycle over an API implementation.
#[derive(Clone, Debug)]
pub struct ContainerGroupProvider<A> {
    api: A,
    subscription_id: String,
    timeouts: OperationTimeouts,
    operation_poll_interval: Duration,
    detach_poll_interval: Duration,
    detach_continuous_occurrences: u32,
}

impl<A: ContainerGroupsApi> ContainerGroupProvider<A> {
    /// Creates a provider for groups in `subscription_id` with default
    /// timeouts.
    #[must_use]
    pub fn new(api: A, subscription_id: impl Into<String>) -> Self {
        Self {
            api,
            subscription_id: subscription_id.into(),
            timeouts: OperationTimeouts::default(),
            operation_poll_interval: DEFAULT_OPERATION_POLL_INTERVAL,
            detach_poll_interval: DETACH_POLL_INTERVAL,
            detach_continuous_occurrences: DETACH_CONTINUOUS_OCCURRENCES,
        }
    }

    /// Replaces the per-operation timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the delay between operation polls when the service does not
    /// send `Retry-After`.
    #[must_use]
    pub const fn with_operation_poll_interval(mut self, interval: Duration) -> Self {
        self.operation_poll_interval = interval;
        self
    }

    /// Sets the network profile detach poll interval and the number of
    /// consecutive detached observations required.
    #[must_use]
    pub const fn with_detach_policy(mut self, interval: Duration, occurrences: u32) -> Self {
        self.detach_poll_interval = interval;
        self.detach_continuous_occurrences = occurrences;
        self
    }

    /// Returns the configured timeouts.
    #[must_use]
    pub const fn timeouts(&self) -> OperationTimeouts {
        self.timeouts
    }

    /// Returns the id a document's group will have.
    #[must_use]
    pub fn group_id(&self, spec: &ContainerGroupSpec) -> ContainerGroupId {
        ContainerGroupId::new(
            self.subscription_id.clone(),
            spec.resource_group_name.clone(),
            spec.name.clone(),
        )
    }

    /// Creates or replaces the group described by `spec` and returns its
    /// refreshed state.
    ///
    /// When `is_new` is set an existing group with the same id is an error;
    /// it must be imported instead.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Spec`] or [`ProviderError::Expand`] before
    /// any request when the document is invalid,
    /// [`ProviderError::AlreadyExists`] for a conflicting group,
    /// [`ProviderError::Operation`] when the long-running operation fails or
    /// the group ends up `Failed` or `Canceled`,
    /// [`ProviderError::MissingId`] when the created group has no id and
    /// [`ProviderError::Timeout`] when the create budget is exhausted.
    #[tracing::instrument(
        name = "provider::create",
        skip_all,
        fields(group = %spec.name, resource_group = %spec.resource_group_name)
    )]
    pub async fn create(
        &self,
        spec: &ContainerGroupSpec,
        is_new: bool,
    ) -> Result<ContainerGroupState, ProviderError> {
        spec.validate()?;
        let request = expand_container_group(spec)?;
        let id = self.group_id(spec);

        bounded(Operation::Create, &id, self.timeouts.create, async {
            if is_new {
                match self.api.get_group(&id).await {
                    Ok(_) => {
                        return Err(ProviderError::AlreadyExists { id: id.to_string() });
                    }
                    Err(ApiError::NotFound) => {}
                    Err(err) => return Err(ProviderError::api(Operation::Create, &id, err)),
                }
            }

            let handle = self
                .api
                .begin_create_or_update(&id, &request)
                .await
                .map_err(|err| ProviderError::api(Operation::Create, &id, err))?;
            self.wait_for_operation(Operation::Create, &id, handle)
                .await?;

            let created = self.fetch_provisioned(&id).await?;
            if created.id.as_deref().is_none_or(str::is_empty) {
                return Err(ProviderError::MissingId {
                    operation: Operation::Create,
                    name: id.name.clone(),
                    resource_group: id.resource_group.clone(),
                });
            }
            info!("container group created");
            Ok(flatten_container_group(&created, Some(spec))?)
        })
        .await
    }

    /// Refreshes the group's state. `Ok(None)` means the group no longer
    /// exists and should be removed from state.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Api`] for failures other than not found,
    /// [`ProviderError::Flatten`] when the response cannot be interpreted and
    /// [`ProviderError::Timeout`] when the read budget is exhausted.
    #[tracing::instrument(
        name = "provider::read",
        skip_all,
        fields(group = %id.name, resource_group = %id.resource_group)
    )]
    pub async fn read(
        &self,
        id: &ContainerGroupId,
        prior: Option<&ContainerGroupSpec>,
    ) -> Result<Option<ContainerGroupState>, ProviderError> {
        bounded(Operation::Read, id, self.timeouts.read, self.fetch(Operation::Read, id, prior))
            .await
    }

    /// Applies the tags of `spec` in place and returns the refreshed state.
    /// Every other attribute forces replacement and is not sent.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Api`] when the patch or the follow-up read
    /// fails, including when the group has disappeared.
    #[tracing::instrument(
        name = "provider::update",
        skip_all,
        fields(group = %id.name, resource_group = %id.resource_group)
    )]
    pub async fn update(
        &self,
        id: &ContainerGroupId,
        spec: &ContainerGroupSpec,
    ) -> Result<ContainerGroupState, ProviderError> {
        let patch = TagsPatch {
            tags: spec.tags.clone(),
        };
        bounded(Operation::Update, id, self.timeouts.update, async {
            self.api
                .update_tags(id, &patch)
                .await
                .map_err(|err| ProviderError::api(Operation::Update, id, err))?;
            self.fetch(Operation::Update, id, Some(spec))
                .await?
                .ok_or_else(|| ProviderError::api(Operation::Update, id, ApiError::NotFound))
        })
        .await
    }

    /// Adopts an existing group by id. Write-only values come back blank.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidId`] when `raw_id` does not name a
    /// container group and [`ProviderError::Api`] when it does not exist.
    #[tracing::instrument(name = "provider::import", skip(self))]
    pub async fn import(&self, raw_id: &str) -> Result<ContainerGroupState, ProviderError> {
        let id = ContainerGroupId::parse(raw_id)?;
        bounded(Operation::Import, &id, self.timeouts.read, async {
            self.fetch(Operation::Import, &id, None)
                .await?
                .ok_or_else(|| ProviderError::api(Operation::Import, &id, ApiError::NotFound))
        })
        .await
    }

    async fn fetch(
        &self,
        operation: Operation,
        id: &ContainerGroupId,
        prior: Option<&ContainerGroupSpec>,
    ) -> Result<Option<ContainerGroupState>, ProviderError> {
        match self.api.get_group(id).await {
            Ok(group) => Ok(Some(flatten_container_group(&group, prior)?)),
            Err(ApiError::NotFound) => {
                debug!("container group not found; removing from state");
                Ok(None)
            }
            Err(err) => Err(ProviderError::api(operation, id, err)),
        }
    }

    /// Re-reads a freshly written group until its provisioning state is
    /// terminal. A response without a provisioning state counts as done.
    async fn fetch_provisioned(
        &self,
        id: &ContainerGroupId,
    ) -> Result<ContainerGroup, ProviderError> {
        loop {
            let group = self
                .api
                .get_group(id)
                .await
                .map_err(|err| ProviderError::api(Operation::Create, id, err))?;
            match group.properties.provisioning_state.as_deref() {
                None => return Ok(group),
                Some(state) if state.eq_ignore_ascii_case("Succeeded") => return Ok(group),
                Some(state)
                    if state.eq_ignore_ascii_case("Failed")
                        || state.eq_ignore_ascii_case("Canceled") =>
                {
                    return Err(ProviderError::operation(
                        Operation::Create,
                        id,
                        format!("provisioning state is {state}"),
                    ));
                }
                Some(state) => {
                    debug!(state, "waiting for provisioning to finish");
                    sleep(self.operation_poll_interval).await;
                }
            }
        }
    }

    async fn wait_for_operation(
        &self,
        operation: Operation,
        id: &ContainerGroupId,
        handle: OperationHandle,
    ) -> Result<(), ProviderError> {
        let OperationHandle::Pending {
            url,
            kind,
            retry_after,
        } = handle
        else {
            return Ok(());
        };

        let mut delay = retry_after.unwrap_or(self.operation_poll_interval);
        loop {
            sleep(delay).await;
            let status = self
                .api
                .poll_operation(&url, kind)
                .await
                .map_err(|err| ProviderError::api(operation, id, err))?;
            match status {
                OperationStatus::InProgress { retry_after: next } => {
                    debug!(?next, "operation still in progress");
                    delay = next.unwrap_or(self.operation_poll_interval);
                }
                OperationStatus::Succeeded => return Ok(()),
                OperationStatus::Failed { message } => {
                    return Err(ProviderError::operation(operation, id, message));
                }
                OperationStatus::Canceled => {
                    return Err(ProviderError::operation(
                        operation,
                        id,
                        "the operation was canceled",
                    ));
                }
            }
        }
    }
}

async fn bounded<T, F>(
    operation: Operation,
    id: &ContainerGroupId,
    budget: Duration,
    work: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    timeout(budget, work)
        .await
        .map_err(|_| ProviderError::Timeout {
            operation,
            name: id.name.clone(),
            resource_group: id.resource_group.clone(),
            timeout: budget,
        })?
}

#[cfg(test)]
mod tests;
