//! Seam between the provider and the resource manager.
//!
//! [`ContainerGroupsApi`] is the only way the provider talks to Azure.
//! [`ArmClient`] implements it over HTTPS; tests use the in-memory double in
//! `test_support`.

mod arm;
pub mod models;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::ids::{ContainerGroupId, NetworkProfileId};
use models::{ContainerGroup, NetworkProfile};

pub use arm::ArmClient;

/// Errors returned by API calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// The resource does not exist.
    #[error("resource not found")]
    NotFound,
    /// The service answered with a non-success status.
    #[error("unexpected status {status}: {code}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Service error code.
        code: String,
        /// Service error message.
        message: String,
    },
    /// The request could not be sent or the response could not be read.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns true for a 404 from the service.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Future returned by API operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// How the status of a long-running operation is retrieved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollKind {
    /// `Azure-AsyncOperation` header: a status document with a `status` field.
    AsyncOperation,
    /// `Location` header: 202 while running, any other success when done.
    Location,
}

/// Handle returned when a mutating call is accepted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationHandle {
    /// The service finished the operation synchronously.
    Completed,
    /// The operation continues in the background.
    Pending {
        /// Status URL.
        url: String,
        /// How to interpret responses from `url`.
        kind: PollKind,
        /// Delay requested by the service before the next poll.
        retry_after: Option<Duration>,
    },
}

/// Observed status of a long-running operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationStatus {
    /// Still running; poll again after the optional delay.
    InProgress {
        /// Delay requested by the service.
        retry_after: Option<Duration>,
    },
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed {
        /// Error reported by the service.
        message: String,
    },
    /// Cancelled before completion.
    Canceled,
}

/// Operations the provider needs from the resource manager.
pub trait ContainerGroupsApi: Send + Sync {
    /// Fetches a container group.
    fn get_group<'a>(&'a self, id: &'a ContainerGroupId) -> ApiFuture<'a, ContainerGroup>;

    /// Starts a create-or-update of a container group.
    fn begin_create_or_update<'a>(
        &'a self,
        id: &'a ContainerGroupId,
        group: &'a ContainerGroup,
    ) -> ApiFuture<'a, OperationHandle>;

    /// Replaces the tags of a container group.
    fn update_tags<'a>(
        &'a self,
        id: &'a ContainerGroupId,
        tags: &'a models::TagsPatch,
    ) -> ApiFuture<'a, ContainerGroup>;

    /// Starts the deletion of a container group.
    fn begin_delete<'a>(&'a self, id: &'a ContainerGroupId) -> ApiFuture<'a, OperationHandle>;

    /// Polls a pending operation once.
    fn poll_operation<'a>(
        &'a self,
        url: &'a str,
        kind: PollKind,
    ) -> ApiFuture<'a, OperationStatus>;

    /// Fetches a network profile.
    fn get_network_profile<'a>(
        &'a self,
        id: &'a NetworkProfileId,
    ) -> ApiFuture<'a, NetworkProfile>;
}
