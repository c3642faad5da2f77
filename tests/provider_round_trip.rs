//! End-to-end provider behaviour against the in-memory resource manager.

use flotilla::spec::Protocol;
use flotilla::test_support::{CallKind, FAKE_IP_ADDRESS, FakeArm, SUBSCRIPTION_ID};
use flotilla::{
    ContainerGroupId, ContainerGroupProvider, expand_document, replacement_reasons, spec,
};
use rstest::*;

/// Two Linux containers sharing an empty-dir volume, with no
/// `exposed_ports` block.
const SHARED_SCRATCH: &str = r#"{
  "name": "batch",
  "resource_group_name": "rg1",
  "location": "West Europe",
  "os_type": "Linux",
  "dns_config": {
    "nameservers": ["10.0.0.10"],
    "search_domains": ["svc.local"],
    "options": ["ndots:1"]
  },
  "containers": [
    {
      "name": "worker",
      "image": "busybox:1.36",
      "cpu": 0.5,
      "memory": 0.5,
      "ports": [{ "port": 8080 }],
      "volumes": [
        { "name": "scratch", "mount_path": "/scratch", "empty_dir": true }
      ]
    },
    {
      "name": "collector",
      "image": "fluent/fluent-bit:3.0",
      "cpu": 0.5,
      "memory": 0.5,
      "ports": [{ "port": 24224, "protocol": "UDP" }],
      "volumes": [
        { "name": "scratch", "mount_path": "/var/log/batch", "read_only": true, "empty_dir": true }
      ]
    }
  ],
  "tags": { "team": "data" }
}"#;

/// Optional strings left blank rather than omitted.
const BLANK_OPTIONALS: &str = r#"{
  "name": "site",
  "resource_group_name": "rg1",
  "location": "westeurope",
  "os_type": "Linux",
  "dns_name_label": "",
  "containers": [
    {
      "name": "web",
      "image": "nginx:1.27",
      "cpu": 0.5,
      "memory": 0.5,
      "ports": [{ "port": 80 }],
      "volumes": [
        {
          "name": "content",
          "mount_path": "/usr/share/nginx/html",
          "git_repo": { "url": "https://example.com/site.git", "directory": "", "revision": "" }
        }
      ]
    }
  ]
}"#;

#[fixture]
fn fake() -> FakeArm {
    FakeArm::new()
}

#[test]
fn shared_empty_dir_is_declared_once_and_ports_are_exposed() {
    let group = expand_document(SHARED_SCRATCH).expect("document should expand");
    assert_eq!(group.properties.volumes.len(), 1);
    assert!(
        group
            .properties
            .volumes
            .iter()
            .all(|volume| volume.name == "scratch" && volume.empty_dir.is_some())
    );
    let exposed: Vec<(u16, Option<Protocol>)> = group
        .properties
        .ip_address
        .as_ref()
        .map(|address| {
            address
                .ports
                .iter()
                .map(|port| (port.port, port.protocol))
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(
        exposed,
        vec![(8080, Some(Protocol::Tcp)), (24224, Some(Protocol::Udp))]
    );
}

#[rstest]
#[tokio::test]
async fn created_group_reads_back_as_the_document(fake: FakeArm) {
    let desired = spec::decode(SHARED_SCRATCH).expect("document should decode");
    let provider = ContainerGroupProvider::new(fake.clone(), SUBSCRIPTION_ID);

    let state = provider
        .create(&desired, true)
        .await
        .expect("create should succeed");

    let expected = spec::ContainerGroupSpec {
        location: String::from("westeurope"),
        ..desired.clone()
    };
    assert_eq!(state.spec, expected);
    assert_eq!(state.spec.exposed_ports, None);
    assert_eq!(state.ip_address.as_deref(), Some(FAKE_IP_ADDRESS));
    assert_eq!(
        state.id,
        ContainerGroupId::new(SUBSCRIPTION_ID, "rg1", "batch")
    );

    let reread = provider
        .read(&state.id, Some(&desired))
        .await
        .expect("read should succeed")
        .expect("group should exist");
    assert_eq!(reread, state);
}

#[rstest]
#[tokio::test]
async fn deleting_an_absent_group_issues_no_delete(fake: FakeArm) {
    let provider = ContainerGroupProvider::new(fake.clone(), SUBSCRIPTION_ID);
    let id = ContainerGroupId::new(SUBSCRIPTION_ID, "rg1", "ghost");

    provider
        .delete(&id)
        .await
        .expect("missing group counts as deleted");

    assert_eq!(fake.count(CallKind::GetGroup), 1);
    assert_eq!(fake.count(CallKind::Delete), 0);
}

#[rstest]
#[tokio::test]
async fn blank_optionals_do_not_force_replacement(fake: FakeArm) {
    let desired = spec::decode(BLANK_OPTIONALS).expect("document should decode");
    let provider = ContainerGroupProvider::new(fake, SUBSCRIPTION_ID);

    let state = provider
        .create(&desired, true)
        .await
        .expect("create should succeed");

    assert!(
        replacement_reasons(&state.spec, &desired).is_empty(),
        "reasons: {:?}",
        replacement_reasons(&state.spec, &desired)
    );
}
