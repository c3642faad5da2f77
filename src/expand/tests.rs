//! Unit tests for request expansion.

use super::*;
use crate::api::models::ResourceIdentityType;
use crate::test_support::sample_spec;
use rstest::{fixture, rstest};

#[fixture]
fn spec() -> ContainerGroupSpec {
    sample_spec()
}

fn port(port: u16, protocol: Protocol) -> PortSpec {
    PortSpec::new(port, protocol)
}

#[rstest]
fn explicit_ports_missing_on_containers_fail_with_port_and_protocol(
    mut spec: ContainerGroupSpec,
) {
    spec.exposed_ports = Some(BTreeSet::from([
        port(8080, Protocol::Tcp),
        port(5353, Protocol::Udp),
    ]));
    let err = expand_container_group(&spec).expect_err("unknown ports must fail");
    let ExpandError::PortNotExposed { port, protocol } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!([5353, 8080].contains(port));
    let message = err.to_string();
    assert!(message.contains(&format!("{port}/{protocol}")), "{message}");
}

#[rstest]
fn udp_port_does_not_satisfy_tcp_exposure(mut spec: ContainerGroupSpec) {
    spec.exposed_ports = Some(BTreeSet::from([port(80, Protocol::Udp)]));
    assert_eq!(
        expand_container_group(&spec),
        Err(ExpandError::PortNotExposed {
            port: 80,
            protocol: Protocol::Udp,
        })
    );
}

#[rstest]
fn unset_exposed_ports_default_to_every_container_port(mut spec: ContainerGroupSpec) {
    spec.exposed_ports = None;
    let request = expand_container_group(&spec).expect("expand should succeed");
    let exposed: BTreeSet<(u16, Option<Protocol>)> = request
        .properties
        .ip_address
        .expect("ip address is always set")
        .ports
        .into_iter()
        .map(|group_port| (group_port.port, group_port.protocol))
        .collect();
    let declared: BTreeSet<(u16, Option<Protocol>)> = spec
        .containers
        .iter()
        .flat_map(|container| container.ports.iter())
        .map(|declared_port| (declared_port.port, Some(declared_port.protocol)))
        .collect();
    assert_eq!(exposed, declared);
}

#[rstest]
fn empty_dir_volumes_are_declared_once(mut spec: ContainerGroupSpec) {
    let shared = VolumeSpec {
        name: String::from("shared"),
        mount_path: String::from("/shared"),
        read_only: false,
        source: VolumeSource::EmptyDir,
    };
    for container in &mut spec.containers {
        container.volumes.push(shared.clone());
    }
    let request = expand_container_group(&spec).expect("expand should succeed");
    let shared_count = request
        .properties
        .volumes
        .iter()
        .filter(|volume| volume.name == "shared")
        .count();
    assert_eq!(shared_count, 1);
    let mounts = request
        .properties
        .containers
        .iter()
        .filter(|container| {
            container
                .properties
                .volume_mounts
                .iter()
                .any(|mount| mount.name == "shared")
        })
        .count();
    assert_eq!(mounts, spec.containers.len());
}

#[rstest]
fn secret_volumes_are_not_deduplicated(mut spec: ContainerGroupSpec) {
    let secret = VolumeSpec {
        name: String::from("creds"),
        mount_path: String::from("/creds"),
        read_only: true,
        source: VolumeSource::Secret(BTreeMap::from([(
            String::from("token"),
            String::from("c2VjcmV0"),
        )])),
    };
    for container in &mut spec.containers {
        container.volumes.push(secret.clone());
    }
    let request = expand_container_group(&spec).expect("expand should succeed");
    let count = request
        .properties
        .volumes
        .iter()
        .filter(|volume| volume.name == "creds")
        .count();
    assert_eq!(count, spec.containers.len());
}

#[rstest]
fn conflicting_volume_document_fails_to_expand(spec: ContainerGroupSpec) {
    let mut document = serde_json::to_value(&spec).expect("spec should serialize");
    document["containers"][0]["volumes"] = serde_json::json!([{
        "name": "cache",
        "mount_path": "/cache",
        "empty_dir": true,
        "share_name": "share"
    }]);
    let err = expand_document(&document.to_string()).expect_err("conflict must fail");
    assert!(matches!(err, ExpandError::Spec(SpecError::Decode(_))), "{err}");
}

#[rstest]
fn environment_lists_plain_then_secure(spec: ContainerGroupSpec) {
    let request = expand_container_group(&spec).expect("expand should succeed");
    let env = &request.properties.containers[0].properties.environment_variables;
    let names: Vec<(&str, bool)> = env
        .iter()
        .map(|var| (var.name.as_str(), var.secure_value.is_some()))
        .collect();
    assert_eq!(
        names,
        vec![("LOG_LEVEL", false), ("MODE", false), ("API_KEY", true)]
    );
    assert!(env.iter().all(|var| var.value.is_some() != var.secure_value.is_some()));
}

#[rstest]
fn windows_group_with_network_profile_is_rejected(mut spec: ContainerGroupSpec) {
    spec.os_type = OsType::Windows;
    spec.dns_name_label = None;
    spec.identity = None;
    spec.network_profile_id = Some(String::from(
        "/subscriptions/sub/resourceGroups/net/providers/Microsoft.Network/networkProfiles/p1",
    ));
    assert_eq!(
        expand_container_group(&spec),
        Err(ExpandError::NetworkProfileRequiresLinux {
            os_type: OsType::Windows,
        })
    );
}

#[rstest]
fn dns_search_domains_and_options_are_space_joined(mut spec: ContainerGroupSpec) {
    spec.dns_config = Some(DnsConfigSpec {
        nameservers: vec![String::from("1.1.1.1"), String::from("8.8.8.8")],
        search_domains: BTreeSet::from([String::from("a.com"), String::from("b.com")]),
        options: BTreeSet::from([String::from("ndots:2")]),
    });
    let dns = expand_container_group(&spec)
        .expect("expand should succeed")
        .properties
        .dns_config
        .expect("dns config should be sent");
    assert_eq!(dns.name_servers.join(" "), "1.1.1.1 8.8.8.8");
    assert!(matches!(
        dns.search_domains.as_deref(),
        Some("a.com b.com" | "b.com a.com")
    ));
    assert_eq!(dns.options.as_deref(), Some("ndots:2"));
}

#[rstest]
fn metadata_is_only_sent_with_a_log_type(mut spec: ContainerGroupSpec) {
    if let Some(diagnostics) = spec.diagnostics.as_mut() {
        diagnostics.log_analytics.log_type = None;
    }
    let analytics = expand_container_group(&spec)
        .expect("expand should succeed")
        .properties
        .diagnostics
        .expect("diagnostics should be sent")
        .log_analytics;
    assert_eq!(analytics.metadata, None);
    assert_eq!(analytics.log_type, None);
}

#[rstest]
fn system_assigned_identity_omits_user_ids(mut spec: ContainerGroupSpec) {
    spec.identity = Some(IdentitySpec {
        kind: IdentityType::SystemAssigned,
        identity_ids: vec![String::from(
            "/subscriptions/sub/resourceGroups/ids/providers/Microsoft.ManagedIdentity/userAssignedIdentities/app",
        )],
    });
    let identity = expand_container_group(&spec)
        .expect("expand should succeed")
        .identity
        .expect("identity should be sent");
    assert_eq!(identity.kind, ResourceIdentityType::SystemAssigned);
    assert_eq!(identity.user_assigned_identities, None);
}

#[rstest]
fn probe_integers_are_only_sent_when_positive() {
    let probe = expand_probe(&ProbeSpec {
        exec: vec![String::from("cat"), String::from("/tmp/ready")],
        initial_delay_seconds: 5,
        ..ProbeSpec::default()
    });
    assert_eq!(probe.initial_delay_seconds, Some(5));
    assert_eq!(probe.period_seconds, None);
    assert_eq!(probe.timeout_seconds, None);
    assert!(probe.http_get.is_none());
}

#[rstest]
fn location_is_normalized(mut spec: ContainerGroupSpec) {
    spec.location = String::from("West Europe");
    let request = expand_container_group(&spec).expect("expand should succeed");
    assert_eq!(request.location.as_deref(), Some("westeurope"));
}
