//! Attribute table for container group documents.
//!
//! Hosts use the table to plan changes: every attribute except `tags`
//! forces the group to be replaced, and sensitive attributes must be masked
//! in output.

use serde::Serialize;

use crate::spec::{ContainerGroupSpec, normalize_location};

/// Whether an attribute is supplied by the user, the service or either.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Must be set in the document.
    Required,
    /// May be set in the document.
    Optional,
    /// Set by the service only.
    Computed,
    /// May be set; otherwise the service supplies a value.
    OptionalComputed,
}

/// One attribute of the document or its state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Attribute {
    /// Dotted attribute path.
    pub name: &'static str,
    /// Who supplies the value.
    pub presence: Presence,
    /// A change replaces the group.
    pub force_new: bool,
    /// The value must not be displayed.
    pub sensitive: bool,
}

const fn attribute(
    name: &'static str,
    presence: Presence,
    force_new: bool,
    sensitive: bool,
) -> Attribute {
    Attribute {
        name,
        presence,
        force_new,
        sensitive,
    }
}

const ATTRIBUTES: &[Attribute] = &[
    attribute("id", Presence::Computed, false, false),
    attribute("name", Presence::Required, true, false),
    attribute("resource_group_name", Presence::Required, true, false),
    attribute("location", Presence::Required, true, false),
    attribute("os_type", Presence::Required, true, false),
    attribute("ip_address_type", Presence::Optional, true, false),
    attribute("network_profile_id", Presence::Optional, true, false),
    attribute("restart_policy", Presence::Optional, true, false),
    attribute("dns_name_label", Presence::Optional, true, false),
    attribute("identity", Presence::Optional, true, false),
    attribute("identity.principal_id", Presence::Computed, false, false),
    attribute("dns_config", Presence::Optional, true, false),
    attribute("diagnostics", Presence::Optional, true, false),
    attribute(
        "diagnostics.log_analytics.workspace_key",
        Presence::Required,
        true,
        true,
    ),
    attribute("containers", Presence::Required, true, false),
    attribute(
        "containers.secure_environment_variables",
        Presence::Optional,
        true,
        true,
    ),
    attribute("containers.volumes.secret", Presence::Optional, true, true),
    attribute(
        "containers.volumes.storage_account_key",
        Presence::Optional,
        true,
        true,
    ),
    attribute("exposed_ports", Presence::OptionalComputed, true, false),
    attribute("image_registry_credentials", Presence::Optional, true, false),
    attribute(
        "image_registry_credentials.password",
        Presence::Required,
        true,
        true,
    ),
    attribute("ip_address", Presence::Computed, false, false),
    attribute("fqdn", Presence::Computed, false, false),
    attribute("tags", Presence::Optional, false, false),
];

/// Returns every attribute in document order.
#[must_use]
pub const fn attributes() -> &'static [Attribute] {
    ATTRIBUTES
}

/// Looks up an attribute by dotted path.
#[must_use]
pub fn attribute_named(name: &str) -> Option<&'static Attribute> {
    ATTRIBUTES.iter().find(|candidate| candidate.name == name)
}

/// Lists the top-level attributes whose change between `prior` and
/// `desired` forces replacement. An empty list means the change can be
/// applied in place.
#[must_use]
pub fn replacement_reasons(
    prior: &ContainerGroupSpec,
    desired: &ContainerGroupSpec,
) -> Vec<&'static str> {
    let checks = [
        ("name", prior.name != desired.name),
        (
            "resource_group_name",
            !prior
                .resource_group_name
                .eq_ignore_ascii_case(&desired.resource_group_name),
        ),
        (
            "location",
            normalize_location(&prior.location) != normalize_location(&desired.location),
        ),
        ("os_type", prior.os_type != desired.os_type),
        ("ip_address_type", prior.ip_address_type != desired.ip_address_type),
        (
            "network_profile_id",
            !same_optional_id(
                prior.network_profile_id.as_deref(),
                desired.network_profile_id.as_deref(),
            ),
        ),
        ("restart_policy", prior.restart_policy != desired.restart_policy),
        ("dns_name_label", prior.dns_name_label != desired.dns_name_label),
        ("identity", prior.identity != desired.identity),
        ("dns_config", prior.dns_config != desired.dns_config),
        ("diagnostics", prior.diagnostics != desired.diagnostics),
        ("containers", prior.containers != desired.containers),
        ("exposed_ports", prior.exposed_ports != desired.exposed_ports),
        (
            "image_registry_credentials",
            prior.image_registry_credentials != desired.image_registry_credentials,
        ),
    ];
    checks
        .into_iter()
        .filter_map(|(name, changed)| changed.then_some(name))
        .collect()
}

fn same_optional_id(left: Option<&str>, right: Option<&str>) -> bool {
    match (left, right) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}
