//! Unit tests for the container group lifecycle.

use std::collections::BTreeSet;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::ids::NetworkProfileId;
use crate::spec::{IpAddressType, PortSpec, Protocol};
use crate::test_support::{
    CallKind, FAKE_IP_ADDRESS, FakeArm, SUBSCRIPTION_ID, sample_group_id, sample_spec,
};

#[fixture]
fn fake() -> FakeArm {
    FakeArm::new()
}

fn provider(fake: &FakeArm) -> ContainerGroupProvider<FakeArm> {
    ContainerGroupProvider::new(fake.clone(), SUBSCRIPTION_ID)
}

fn profile_id() -> NetworkProfileId {
    NetworkProfileId::new(SUBSCRIPTION_ID, "net", "aci-profile")
}

/// A group deployed into a virtual network.
fn networked_spec() -> ContainerGroupSpec {
    let mut spec = sample_spec();
    spec.ip_address_type = IpAddressType::Private;
    spec.dns_name_label = None;
    spec.identity = None;
    spec.network_profile_id = Some(profile_id().to_string());
    spec
}

async fn seeded(fake: &FakeArm, spec: &ContainerGroupSpec) -> ContainerGroupState {
    provider(fake)
        .create(spec, true)
        .await
        .expect("seeding create should succeed")
}

#[rstest]
#[tokio::test]
async fn create_returns_refreshed_state(fake: FakeArm) {
    let spec = sample_spec();
    let state = provider(&fake)
        .create(&spec, true)
        .await
        .expect("create should succeed");

    assert_eq!(state.id, sample_group_id());
    assert_eq!(state.spec, spec);
    assert_eq!(state.ip_address.as_deref(), Some(FAKE_IP_ADDRESS));
    assert_eq!(
        state.fqdn.as_deref(),
        Some("flotilla-web.westeurope.azurecontainer.io")
    );
    assert!(state.principal_id.is_some());
    assert_eq!(
        fake.calls()
            .iter()
            .map(|call| call.kind)
            .collect::<Vec<_>>(),
        vec![
            CallKind::GetGroup,
            CallKind::CreateOrUpdate,
            CallKind::GetGroup
        ]
    );
}

#[rstest]
#[tokio::test]
async fn create_refuses_to_adopt_an_existing_group(fake: FakeArm) {
    let spec = sample_spec();
    seeded(&fake, &spec).await;

    let err = provider(&fake)
        .create(&spec, true)
        .await
        .expect_err("existing group must be rejected");
    assert!(matches!(err, ProviderError::AlreadyExists { .. }), "{err}");
    assert!(err.to_string().contains("flotilla import"), "{err}");
    assert_eq!(fake.count(CallKind::CreateOrUpdate), 1);
}

#[rstest]
#[tokio::test]
async fn replacing_create_skips_the_existence_check(fake: FakeArm) {
    let spec = sample_spec();
    seeded(&fake, &spec).await;

    provider(&fake)
        .create(&spec, false)
        .await
        .expect("replacement should succeed");
    assert_eq!(fake.count(CallKind::CreateOrUpdate), 2);
}

#[rstest]
#[tokio::test]
async fn existence_check_failures_are_wrapped(fake: FakeArm) {
    fake.fail_next(
        CallKind::GetGroup,
        ApiError::Status {
            status: 500,
            code: String::from("InternalServerError"),
            message: String::from("try again"),
        },
    );
    let err = provider(&fake)
        .create(&sample_spec(), true)
        .await
        .expect_err("check failure must surface");
    let ProviderError::Api {
        operation,
        name,
        resource_group,
        ..
    } = &err
    else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(*operation, Operation::Create);
    assert_eq!(name, "web");
    assert_eq!(resource_group, "rg1");
    assert_eq!(fake.count(CallKind::CreateOrUpdate), 0);
}

#[rstest]
#[tokio::test]
async fn invalid_documents_fail_before_any_request(fake: FakeArm) {
    let mut unexposed = sample_spec();
    unexposed.exposed_ports = Some(BTreeSet::from([PortSpec::new(8080, Protocol::Tcp)]));
    let err = provider(&fake)
        .create(&unexposed, true)
        .await
        .expect_err("unexposed port must fail");
    assert!(matches!(err, ProviderError::Expand(_)), "{err}");

    let mut empty = sample_spec();
    empty.containers.clear();
    let err = provider(&fake)
        .create(&empty, true)
        .await
        .expect_err("a group needs containers");
    assert!(matches!(err, ProviderError::Spec(_)), "{err}");

    assert!(fake.calls().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn create_polls_the_operation_until_it_succeeds(fake: FakeArm) {
    fake.script_operations([
        OperationStatus::InProgress { retry_after: None },
        OperationStatus::InProgress {
            retry_after: Some(Duration::from_secs(1)),
        },
        OperationStatus::Succeeded,
    ]);
    provider(&fake)
        .create(&sample_spec(), true)
        .await
        .expect("create should succeed");
    assert_eq!(fake.count(CallKind::PollOperation), 3);
}

#[rstest]
#[case(
    OperationStatus::Failed { message: String::from("InaccessibleImage: image not found") },
    "InaccessibleImage"
)]
#[case(OperationStatus::Canceled, "canceled")]
#[tokio::test(start_paused = true)]
async fn unsuccessful_operations_are_reported(
    fake: FakeArm,
    #[case] outcome: OperationStatus,
    #[case] expected: &str,
) {
    fake.script_operations([outcome]);
    let err = provider(&fake)
        .create(&sample_spec(), true)
        .await
        .expect_err("operation failure must surface");
    assert!(matches!(err, ProviderError::Operation { .. }), "{err}");
    assert!(err.to_string().contains(expected), "{err}");
}

#[rstest]
#[case("Failed")]
#[case("Canceled")]
#[tokio::test]
async fn synchronous_create_reports_a_failed_provisioning_state(
    fake: FakeArm,
    #[case] state: &str,
) {
    fake.script_provisioning([state]);
    let err = provider(&fake)
        .create(&sample_spec(), true)
        .await
        .expect_err("a failed group must not be recorded as created");
    assert!(matches!(err, ProviderError::Operation { .. }), "{err}");
    assert!(err.to_string().contains(state), "{err}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn create_waits_for_a_transient_provisioning_state(fake: FakeArm) {
    fake.script_provisioning(["Pending", "Creating"]);
    let state = provider(&fake)
        .create(&sample_spec(), true)
        .await
        .expect("create should succeed once provisioning finishes");
    assert_eq!(state.spec, sample_spec());
    assert_eq!(fake.count(CallKind::GetGroup), 4);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn create_is_bounded_by_its_timeout(fake: FakeArm) {
    fake.script_operations(
        std::iter::repeat_n(OperationStatus::InProgress { retry_after: None }, 100),
    );
    let timeouts = OperationTimeouts {
        create: Duration::from_secs(60),
        ..OperationTimeouts::default()
    };
    let err = provider(&fake)
        .with_timeouts(timeouts)
        .create(&sample_spec(), true)
        .await
        .expect_err("create must time out");
    assert_eq!(
        err,
        ProviderError::Timeout {
            operation: Operation::Create,
            name: String::from("web"),
            resource_group: String::from("rg1"),
            timeout: Duration::from_secs(60),
        }
    );
}

#[rstest]
#[tokio::test]
async fn create_requires_an_id_on_the_refreshed_group(fake: FakeArm) {
    fake.omit_id_on_next_read();
    let err = provider(&fake)
        .create(&sample_spec(), false)
        .await
        .expect_err("a group without an id must fail");
    assert_eq!(
        err,
        ProviderError::MissingId {
            operation: Operation::Create,
            name: String::from("web"),
            resource_group: String::from("rg1"),
        }
    );
}

#[rstest]
#[tokio::test]
async fn read_of_a_missing_group_clears_state(fake: FakeArm) {
    let state = provider(&fake)
        .read(&sample_group_id(), Some(&sample_spec()))
        .await
        .expect("read should succeed");
    assert_eq!(state, None);
}

#[rstest]
#[tokio::test]
async fn read_keeps_write_only_values_from_the_prior_document(fake: FakeArm) {
    let spec = sample_spec();
    seeded(&fake, &spec).await;
    let state = provider(&fake)
        .read(&sample_group_id(), Some(&spec))
        .await
        .expect("read should succeed")
        .expect("group exists");
    assert_eq!(state.spec, spec);
}

#[rstest]
#[tokio::test]
async fn import_blanks_write_only_values(fake: FakeArm) {
    let spec = sample_spec();
    seeded(&fake, &spec).await;
    let state = provider(&fake)
        .import(&sample_group_id().to_string())
        .await
        .expect("import should succeed");

    assert_eq!(state.spec.name, spec.name);
    assert!(
        state
            .spec
            .image_registry_credentials
            .iter()
            .all(|credential| credential.password.is_empty())
    );
    let app = state
        .spec
        .containers
        .iter()
        .find(|container| container.name == "app")
        .expect("app container");
    assert_eq!(
        app.secure_environment_variables.get("API_KEY").map(String::as_str),
        Some("")
    );
    assert_eq!(
        state
            .spec
            .diagnostics
            .map(|diagnostics| diagnostics.log_analytics.workspace_key),
        Some(String::new())
    );
}

#[rstest]
#[case("")]
#[case("/subscriptions/sub/resourceGroups/rg1")]
#[case("/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.Network/networkProfiles/p1")]
#[tokio::test]
async fn import_rejects_malformed_ids_without_calling_the_api(
    fake: FakeArm,
    #[case] raw_id: &str,
) {
    let err = provider(&fake)
        .import(raw_id)
        .await
        .expect_err("malformed id must fail");
    assert!(matches!(err, ProviderError::InvalidId(_)), "{err}");
    assert!(fake.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn import_of_a_missing_group_is_not_found(fake: FakeArm) {
    let err = provider(&fake)
        .import(&sample_group_id().to_string())
        .await
        .expect_err("missing group must fail");
    assert!(err.is_not_found(), "{err}");
}

#[rstest]
#[tokio::test]
async fn update_only_patches_tags(fake: FakeArm) {
    let mut spec = sample_spec();
    seeded(&fake, &spec).await;
    spec.tags
        .insert(String::from("owner"), String::from("platform"));

    let state = provider(&fake)
        .update(&sample_group_id(), &spec)
        .await
        .expect("update should succeed");
    assert_eq!(state.spec.tags, spec.tags);
    assert_eq!(fake.count(CallKind::UpdateTags), 1);
    assert_eq!(fake.count(CallKind::CreateOrUpdate), 1);
}

#[rstest]
#[tokio::test]
async fn update_of_a_missing_group_fails(fake: FakeArm) {
    let err = provider(&fake)
        .update(&sample_group_id(), &sample_spec())
        .await
        .expect_err("missing group must fail");
    assert!(err.is_not_found(), "{err}");
}

#[rstest]
#[tokio::test]
async fn delete_of_a_missing_group_makes_no_delete_call(fake: FakeArm) {
    provider(&fake)
        .delete(&sample_group_id())
        .await
        .expect("absent group counts as deleted");
    assert_eq!(fake.count(CallKind::Delete), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn delete_without_network_profile_skips_the_detach_wait(fake: FakeArm) {
    seeded(&fake, &sample_spec()).await;
    fake.script_operations([OperationStatus::InProgress { retry_after: None }]);
    provider(&fake)
        .delete(&sample_group_id())
        .await
        .expect("delete should succeed");
    assert_eq!(fake.count(CallKind::Delete), 1);
    assert_eq!(fake.count(CallKind::GetNetworkProfile), 0);
    assert!(fake.stored_group(&sample_group_id()).is_none());
}

#[rstest]
#[tokio::test]
async fn delete_tolerates_the_group_vanishing_mid_flight(fake: FakeArm) {
    seeded(&fake, &sample_spec()).await;
    fake.fail_next(CallKind::Delete, ApiError::NotFound);
    provider(&fake)
        .delete(&sample_group_id())
        .await
        .expect("vanished group counts as deleted");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn delete_waits_for_consecutive_detached_observations(fake: FakeArm) {
    let id = sample_group_id();
    seeded(&fake, &networked_spec()).await;
    fake.script_profile(
        &profile_id(),
        [
            vec![id.clone()],
            Vec::new(),
            vec![ContainerGroupId::new(SUBSCRIPTION_ID, "RG1", "web")],
            Vec::new(),
        ],
    );

    provider(&fake)
        .delete(&id)
        .await
        .expect("delete should succeed");
    // attached, detached, attached again, then five detached in a row
    assert_eq!(fake.count(CallKind::GetNetworkProfile), 8);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn detach_wait_failure_is_distinct_from_delete_failure(fake: FakeArm) {
    let id = sample_group_id();
    seeded(&fake, &networked_spec()).await;
    fake.script_profile(&profile_id(), [vec![id.clone()]]);
    let timeouts = OperationTimeouts {
        delete: Duration::from_secs(120),
        ..OperationTimeouts::default()
    };

    let err = provider(&fake)
        .with_timeouts(timeouts)
        .delete(&id)
        .await
        .expect_err("profile never releases the group");
    let ProviderError::DetachWait { reason, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(reason.contains("Attached"), "{reason}");
    assert!(fake.stored_group(&id).is_none());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn detach_refresh_errors_surface(fake: FakeArm) {
    let id = sample_group_id();
    seeded(&fake, &networked_spec()).await;
    fake.script_profile(&profile_id(), [Vec::new()]);
    fake.fail_next(
        CallKind::GetNetworkProfile,
        ApiError::Transport(String::from("connection reset")),
    );

    let err = provider(&fake)
        .with_detach_policy(Duration::from_secs(1), 2)
        .delete(&id)
        .await
        .expect_err("refresh failure must surface");
    assert!(matches!(err, ProviderError::DetachWait { .. }), "{err}");
    assert!(err.to_string().contains("connection reset"), "{err}");
}
