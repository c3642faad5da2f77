//! Azure Resource Manager identifiers used by the container group provider.
//!
//! Every Read, Update, Delete and Import call parses its identifier through
//! these types so a malformed path is rejected before any request is made.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing a resource identifier.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IdError {
    /// Raised when the identifier does not match the expected layout.
    #[error("invalid {kind} id {input:?}: {reason}")]
    Invalid {
        /// Human readable resource kind (for example `container group`).
        kind: &'static str,
        /// Identifier as supplied by the caller.
        input: String,
        /// Description of the mismatch.
        reason: String,
    },
}

impl IdError {
    fn invalid(kind: &'static str, input: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            input: input.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Key/value view of a `/subscriptions/{id}/resourceGroups/{rg}/providers/...`
/// path.
#[derive(Clone, Debug, Eq, PartialEq)]
struct ResourcePath {
    subscription_id: String,
    resource_group: String,
    provider: String,
    segments: Vec<(String, String)>,
}

impl ResourcePath {
    fn parse(kind: &'static str, input: &str) -> Result<Self, IdError> {
        let trimmed = input.trim();
        let Some(body) = trimmed.strip_prefix('/') else {
            return Err(IdError::invalid(kind, input, "expected a leading '/'"));
        };
        let parts: Vec<&str> = body.trim_end_matches('/').split('/').collect();
        if parts.len() % 2 != 0 {
            return Err(IdError::invalid(
                kind,
                input,
                "expected an even number of path segments",
            ));
        }

        let mut pairs = parts.chunks_exact(2).map(|pair| match pair {
            [key, value] => ((*key).to_owned(), (*value).to_owned()),
            _ => (String::new(), String::new()),
        });

        let (subscription_key, subscription_id) = pairs.next().unwrap_or_default();
        if !subscription_key.eq_ignore_ascii_case("subscriptions") || subscription_id.is_empty() {
            return Err(IdError::invalid(
                kind,
                input,
                "expected the path to start with /subscriptions/{id}",
            ));
        }

        let (group_key, resource_group) = pairs.next().unwrap_or_default();
        if !group_key.eq_ignore_ascii_case("resourceGroups") || resource_group.is_empty() {
            return Err(IdError::invalid(
                kind,
                input,
                "expected a resourceGroups segment after the subscription",
            ));
        }

        let (provider_key, provider) = pairs.next().unwrap_or_default();
        if !provider_key.eq_ignore_ascii_case("providers") || provider.is_empty() {
            return Err(IdError::invalid(
                kind,
                input,
                "expected a providers segment after the resource group",
            ));
        }

        let segments: Vec<(String, String)> = pairs.collect();
        if segments.iter().any(|(key, value)| key.is_empty() || value.is_empty()) {
            return Err(IdError::invalid(kind, input, "path contains an empty segment"));
        }

        Ok(Self {
            subscription_id,
            resource_group,
            provider,
            segments,
        })
    }

    /// Returns the resource name when the path ends in exactly one
    /// `{resource_type}/{name}` pair below the expected provider namespace.
    fn single_resource(
        &self,
        kind: &'static str,
        input: &str,
        namespace: &str,
        resource_type: &str,
    ) -> Result<String, IdError> {
        if !self.provider.eq_ignore_ascii_case(namespace) {
            return Err(IdError::invalid(
                kind,
                input,
                format!("expected provider namespace {namespace}"),
            ));
        }
        match self.segments.as_slice() {
            [(key, name)] if key.eq_ignore_ascii_case(resource_type) => Ok(name.clone()),
            _ => Err(IdError::invalid(
                kind,
                input,
                format!("expected a single {resource_type}/{{name}} segment"),
            )),
        }
    }
}

macro_rules! arm_resource_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $namespace:literal, $resource_type:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name {
            /// Subscription owning the resource.
            pub subscription_id: String,
            /// Resource group containing the resource.
            pub resource_group: String,
            /// Resource name.
            pub name: String,
        }

        impl $name {
            /// Builds an identifier from its components.
            #[must_use]
            pub fn new(
                subscription_id: impl Into<String>,
                resource_group: impl Into<String>,
                name: impl Into<String>,
            ) -> Self {
                Self {
                    subscription_id: subscription_id.into(),
                    resource_group: resource_group.into(),
                    name: name.into(),
                }
            }

            /// Parses a full resource manager path.
            ///
            /// # Errors
            ///
            /// Returns [`IdError::Invalid`] when the path does not describe a
            #[doc = concat!(" ", $kind, ".")]
            pub fn parse(input: &str) -> Result<Self, IdError> {
                let path = ResourcePath::parse($kind, input)?;
                let name = path.single_resource($kind, input, $namespace, $resource_type)?;
                Ok(Self {
                    subscription_id: path.subscription_id,
                    resource_group: path.resource_group,
                    name,
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!(
                        "/subscriptions/{}/resourceGroups/{}/providers/",
                        $namespace,
                        "/",
                        $resource_type,
                        "/{}"
                    ),
                    self.subscription_id, self.resource_group, self.name
                )
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }
    };
}

arm_resource_id!(
    /// Identifier of a `Microsoft.ContainerInstance/containerGroups` resource.
    ContainerGroupId,
    "container group",
    "Microsoft.ContainerInstance",
    "containerGroups"
);

arm_resource_id!(
    /// Identifier of a `Microsoft.Network/networkProfiles` resource.
    NetworkProfileId,
    "network profile",
    "Microsoft.Network",
    "networkProfiles"
);

arm_resource_id!(
    /// Identifier of a `Microsoft.ManagedIdentity/userAssignedIdentities`
    /// resource.
    UserAssignedIdentityId,
    "user assigned identity",
    "Microsoft.ManagedIdentity",
    "userAssignedIdentities"
);

impl ContainerGroupId {
    /// Returns true when this id names group `name` in `resource_group`.
    /// Resource group names compare case-insensitively.
    #[must_use]
    pub fn same_group(&self, resource_group: &str, name: &str) -> bool {
        self.resource_group.eq_ignore_ascii_case(resource_group) && self.name == name
    }
}
