//! Core library for the flotilla container group provider.
//!
//! The crate maps a declarative container group document onto the Azure
//! Resource Manager container group API: documents are validated and
//! expanded into request bodies, long-running operations are polled to
//! completion and responses are flattened back into documents, keeping the
//! write-only values the service never returns.

pub mod api;
pub mod config;
pub mod expand;
pub mod flatten;
pub mod ids;
pub mod provider;
pub mod schema;
pub mod spec;
pub mod state_store;
pub mod test_support;
pub mod wait;

pub use api::{
    ApiError, ArmClient, ContainerGroupsApi, OperationHandle, OperationStatus, PollKind,
};
pub use config::{AzureConfig, ConfigError};
pub use expand::{ExpandError, expand_container_group, expand_document};
pub use flatten::{FlattenError, flatten_container_group};
pub use ids::{ContainerGroupId, IdError, NetworkProfileId, UserAssignedIdentityId};
pub use provider::{
    AttachmentState, ContainerGroupProvider, Operation, OperationTimeouts, ProviderError,
};
pub use schema::replacement_reasons;
pub use spec::{ContainerGroupSpec, ContainerGroupState, SpecError};
pub use state_store::{DEFAULT_STATE_FILE, StateStore, StateStoreError};
pub use wait::{Observation, PollPolicy, WaitError, poll_until};
