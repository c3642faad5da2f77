//! Error types for container group lifecycle operations.

use std::time::Duration;

use thiserror::Error;

use crate::api::ApiError;
use crate::expand::ExpandError;
use crate::flatten::FlattenError;
use crate::ids::{ContainerGroupId, IdError};
use crate::spec::SpecError;

use super::Operation;

/// Errors raised by [`super::ContainerGroupProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when the document fails validation.
    #[error("invalid container group document: {0}")]
    Spec(#[from] SpecError),
    /// Raised when the document cannot be turned into a request.
    #[error(transparent)]
    Expand(#[from] ExpandError),
    /// Raised when an identifier does not parse.
    #[error(transparent)]
    InvalidId(#[from] IdError),
    /// Raised when a create targets a group that already exists.
    #[error(
        "a container group with the id {id:?} already exists; run `flotilla import {id}` to manage it"
    )]
    AlreadyExists {
        /// Id of the existing group.
        id: String,
    },
    /// Wrapper for failed API calls.
    #[error(
        "failed to {operation} container group {name:?} (resource group {resource_group:?}): {source}"
    )]
    Api {
        /// Operation in progress.
        operation: Operation,
        /// Group name.
        name: String,
        /// Resource group name.
        resource_group: String,
        /// Underlying API failure.
        #[source]
        source: ApiError,
    },
    /// Raised when a long-running operation finishes without succeeding.
    #[error(
        "{operation} of container group {name:?} (resource group {resource_group:?}) did not succeed: {message}"
    )]
    Operation {
        /// Operation in progress.
        operation: Operation,
        /// Group name.
        name: String,
        /// Resource group name.
        resource_group: String,
        /// Status or error reported by the service.
        message: String,
    },
    /// Raised when an operation exceeds its time budget.
    #[error(
        "timed out after {timeout:?} waiting to {operation} container group {name:?} (resource group {resource_group:?})"
    )]
    Timeout {
        /// Operation in progress.
        operation: Operation,
        /// Group name.
        name: String,
        /// Resource group name.
        resource_group: String,
        /// Budget that was exhausted.
        timeout: Duration,
    },
    /// Raised when the service returns a group without an id after a create.
    #[error(
        "cannot read container group {name:?} (resource group {resource_group:?}) id after {operation}"
    )]
    MissingId {
        /// Operation in progress.
        operation: Operation,
        /// Group name.
        name: String,
        /// Resource group name.
        resource_group: String,
    },
    /// Raised when the response cannot be flattened.
    #[error("failed to interpret container group response: {0}")]
    Flatten(#[from] FlattenError),
    /// Raised when the group was deleted but its network profile never
    /// released it.
    #[error(
        "container group {name:?} (resource group {resource_group:?}) was deleted but network profile {profile} still references it: {reason}"
    )]
    DetachWait {
        /// Group name.
        name: String,
        /// Resource group name.
        resource_group: String,
        /// Network profile being polled.
        profile: String,
        /// Timeout or refresh failure.
        reason: String,
    },
}

impl ProviderError {
    pub(super) fn api(operation: Operation, id: &ContainerGroupId, source: ApiError) -> Self {
        Self::Api {
            operation,
            name: id.name.clone(),
            resource_group: id.resource_group.clone(),
            source,
        }
    }

    pub(super) fn operation(
        operation: Operation,
        id: &ContainerGroupId,
        message: impl Into<String>,
    ) -> Self {
        Self::Operation {
            operation,
            name: id.name.clone(),
            resource_group: id.resource_group.clone(),
            message: message.into(),
        }
    }

    /// Returns true when the failure is a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Api {
                source: ApiError::NotFound,
                ..
            }
        )
    }
}
