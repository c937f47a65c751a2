//! Integration tests for the provisioning engine over the simulated provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use infrastack::engine::{CatalogImage, Engine, ProviderError, SimulatedProvider};
use infrastack::error::Error;
use infrastack::resources::{
    AccessPolicy, ComputeInstance, EgressRule, ImageFilter, ImageReference, IngressRule,
    KeyCredential, NetworkBlock, Resource, ResourceSpec, RootVolume, SourceRange, Subnet, Tags,
};
use infrastack::secrets::SensitiveString;
use infrastack::stack::{Phase, StackBuilder, StackInputs, StackPlan};
use infrastack::state::{JsonStateStore, MemoryStateStore, StateStore};
use pretty_assertions::assert_eq;

// ============================================================================
// Reference Scenario
// ============================================================================

#[tokio::test]
async fn test_scenario_yields_non_empty_outputs() {
    let harness = Harness::new();
    let report = harness.engine.apply(&scenario_plan()).await.unwrap();

    for (name, value) in report.outputs.entries() {
        assert!(!value.is_empty(), "{} is empty", name);
    }
    assert!(report.outputs.instance_id.starts_with("i-"));
    assert!(report.outputs.public_dns.ends_with(".compute-1.amazonaws.com"));
    assert_eq!(report.created.len(), 8);
    assert_eq!(report.resolved, vec!["btc-tracker-ami".to_string()]);
    assert!(report.reused.is_empty());
}

#[tokio::test]
async fn test_outputs_are_recorded_in_state() {
    let harness = Harness::new();
    let report = harness.engine.apply(&scenario_plan()).await.unwrap();

    let stored = harness.state.get_outputs().unwrap().unwrap();
    assert_eq!(stored, report.outputs);
    assert_eq!(harness.state.len(), 9);
}

#[tokio::test]
async fn test_provider_sees_only_the_caller_address() {
    let harness = Harness::new();
    harness.engine.apply(&scenario_plan()).await.unwrap();

    assert_eq!(
        harness.provider.ingress_sources("btc-tracker-sg"),
        vec![CALLER.to_string(), CALLER.to_string()]
    );
}

#[tokio::test]
async fn test_latest_matching_image_is_used() {
    let harness = Harness::new();
    harness.engine.apply(&scenario_plan()).await.unwrap();

    let image = harness.state.get("btc-tracker-ami").unwrap().unwrap();
    assert_eq!(image.id, "ami-0a1b2c3d4e5f60002");

    let instance = harness.state.get("btc-tracker-instance").unwrap().unwrap();
    assert_eq!(instance.attribute("image_id").unwrap(), image.id);
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn test_second_pass_reuses_everything() {
    let harness = Harness::new();
    let first = harness.engine.apply(&scenario_plan()).await.unwrap();
    let second = harness.rerun().apply(&scenario_plan()).await.unwrap();

    assert!(!second.changed());
    assert_eq!(second.reused.len(), 8);
    assert_eq!(second.outputs, first.outputs);
    assert_eq!(harness.provider.create_count("btc-tracker-instance"), 1);
    // The image is looked up again on every pass.
    assert_eq!(harness.provider.resolve_count(), 2);
}

#[tokio::test]
async fn test_shared_image_filter_is_resolved_once_per_pass() {
    let harness = Harness::new();
    let plan = hand_built_plan(true, &["ami", "ami-spare"]);

    let report = harness.engine.apply(&plan).await.unwrap();

    assert_eq!(harness.provider.resolve_count(), 1);
    assert_eq!(report.resolved.len(), 2);
    let first = harness.state.get("ami").unwrap().unwrap();
    let spare = harness.state.get("ami-spare").unwrap().unwrap();
    assert_eq!(first.id, spare.id);
}

#[tokio::test]
async fn test_changed_caller_replaces_policy() {
    let harness = Harness::new();
    harness.engine.apply(&scenario_plan()).await.unwrap();

    let moved = StackBuilder::build(StackInputs {
        my_ip: SensitiveString::new("198.51.100.7/32"),
        ..scenario_inputs()
    })
    .unwrap();
    let report = harness.rerun().apply(&moved).await.unwrap();

    // The replacement policy gets the same simulated id, so nothing that
    // references it changes.
    assert_eq!(report.created, vec!["btc-tracker-sg".to_string()]);
    assert!(report.reused.contains(&"btc-tracker-instance".to_string()));
    assert_eq!(
        harness.provider.ingress_sources("btc-tracker-sg"),
        vec!["198.51.100.7/32".to_string(), "198.51.100.7/32".to_string()]
    );
}

#[tokio::test]
async fn test_catalog_change_is_picked_up_on_next_pass() {
    let state = Arc::new(MemoryStateStore::new());
    let first = Engine::new(Arc::new(SimulatedProvider::new("us-east-1")), state.clone());
    first.apply(&scenario_plan()).await.unwrap();

    let newer = CatalogImage::new(
        "ami-0f0e0d0c0b0a09999",
        "al2023-ami-2023.7.20250101.0-kernel-6.1-x86_64",
        "amazon",
        "2025-01-01T00:00:00.000Z",
    );
    let provider = SimulatedProvider::new("us-east-1").with_catalog(vec![newer]);
    let second = Engine::new(Arc::new(provider), state.clone());
    let report = second.apply(&scenario_plan()).await.unwrap();

    let image = state.get("btc-tracker-ami").unwrap().unwrap();
    assert_eq!(image.id, "ami-0f0e0d0c0b0a09999");
    // A new image id replaces the instance and nothing else.
    assert_eq!(report.created, vec!["btc-tracker-instance".to_string()]);
}

#[tokio::test]
async fn test_region_change_recreates_everything() {
    let state = Arc::new(MemoryStateStore::new());
    let east = Engine::new(Arc::new(SimulatedProvider::new("us-east-1")), state.clone());
    let first = east.apply(&scenario_plan()).await.unwrap();
    let east_vpc = state.get("btc-tracker-vpc").unwrap().unwrap().id;

    let moved = StackBuilder::build(StackInputs {
        region: "eu-west-1".to_string(),
        ..scenario_inputs()
    })
    .unwrap();
    let west = Engine::new(Arc::new(SimulatedProvider::new("eu-west-1")), state.clone());
    let report = west.apply(&moved).await.unwrap();

    assert!(report.reused.is_empty());
    assert_eq!(report.created.len(), 8);
    assert_ne!(report.outputs.instance_id, first.outputs.instance_id);
    assert!(report.outputs.public_dns.ends_with(".eu-west-1.compute.amazonaws.com"));
    assert_ne!(state.get("btc-tracker-vpc").unwrap().unwrap().id, east_vpc);
    assert_eq!(state.get_outputs().unwrap(), Some(report.outputs));
}

#[tokio::test]
async fn test_json_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");
    let provider = Arc::new(SimulatedProvider::new("eu-west-1"));

    let plan = StackBuilder::build(StackInputs {
        region: "eu-west-1".to_string(),
        ..scenario_inputs()
    })
    .unwrap();

    let store = Arc::new(JsonStateStore::open(&path).unwrap());
    let report = Engine::new(provider.clone(), store)
        .apply(&plan)
        .await
        .unwrap();
    assert!(report.outputs.public_dns.ends_with(".eu-west-1.compute.amazonaws.com"));

    let reopened = Arc::new(JsonStateStore::open(&path).unwrap());
    assert_eq!(reopened.get_outputs().unwrap(), Some(report.outputs.clone()));

    let again = Engine::new(provider.clone(), reopened)
        .apply(&plan)
        .await
        .unwrap();
    assert!(!again.changed());

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(!contents.contains("203.0.113.5"));
}

// ============================================================================
// Failures and Retries
// ============================================================================

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let harness = Harness::new();
    harness
        .provider
        .fail_next("btc-tracker-igw", ProviderError::transient("RequestLimitExceeded"));
    harness
        .provider
        .fail_next("btc-tracker-igw", ProviderError::transient("RequestLimitExceeded"));

    let report = harness.engine.apply(&scenario_plan()).await.unwrap();
    assert!(report.created.contains(&"btc-tracker-igw".to_string()));
    assert_eq!(harness.provider.create_count("btc-tracker-igw"), 3);
}

#[tokio::test]
async fn test_permanent_error_aborts_the_pass() {
    let harness = Harness::new();
    harness.provider.fail_next(
        "btc-tracker-subnet",
        ProviderError::permanent("InvalidSubnet.Range: The CIDR '10.0.1.0/24' is invalid."),
    );

    let err = harness.engine.apply(&scenario_plan()).await.unwrap_err();
    match &err {
        Error::Provision { resource, source } => {
            assert_eq!(resource, "btc-tracker-subnet");
            assert!(source.message().starts_with("InvalidSubnet.Range"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!err.is_local());

    assert_eq!(harness.provider.create_count("btc-tracker-subnet"), 1);
    assert_eq!(harness.provider.create_count("btc-tracker-instance"), 0);
    assert!(harness.state.get("btc-tracker-vpc").unwrap().is_some());
    assert!(harness.state.get_outputs().unwrap().is_none());
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let harness = Harness::new();
    for _ in 0..4 {
        harness
            .provider
            .fail_next("btc-tracker-key", ProviderError::transient("Throttling"));
    }

    let err = harness.engine.apply(&scenario_plan()).await.unwrap_err();
    assert!(matches!(err, Error::Provision { ref resource, .. } if resource == "btc-tracker-key"));
    assert_eq!(harness.provider.create_count("btc-tracker-key"), 4);
}

#[tokio::test]
async fn test_failed_wave_still_records_its_other_resources() {
    let harness = Harness::with_provider(
        SimulatedProvider::new("us-east-1")
            .with_latency_for("btc-tracker-subnet", Duration::from_millis(50)),
    );
    harness.provider.fail_next(
        "btc-tracker-sg",
        ProviderError::permanent("InvalidParameterValue"),
    );

    let err = harness.engine.apply(&scenario_plan()).await.unwrap_err();
    assert!(matches!(err, Error::Provision { ref resource, .. } if resource == "btc-tracker-sg"));

    // igw, subnet and sg share a wave; the slow subnet still lands in state.
    assert!(harness.state.get("btc-tracker-subnet").unwrap().is_some());
    assert!(harness.state.get("btc-tracker-igw").unwrap().is_some());
    assert!(harness.state.get("btc-tracker-sg").unwrap().is_none());

    let report = harness.rerun().apply(&scenario_plan()).await.unwrap();
    assert!(report.reused.contains(&"btc-tracker-subnet".to_string()));
    assert_eq!(harness.provider.create_count("btc-tracker-subnet"), 1);
    assert_eq!(harness.provider.create_count("btc-tracker-sg"), 2);
}

#[tokio::test]
async fn test_provider_messages_hide_the_caller() {
    let harness = Harness::new();
    harness.provider.fail_next(
        "btc-tracker-sg",
        ProviderError::permanent(format!(
            "InvalidParameterValue: CIDR block {} is malformed",
            CALLER
        )),
    );

    let err = harness.engine.apply(&scenario_plan()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Provisioning 'btc-tracker-sg' failed: InvalidParameterValue: CIDR block [REDACTED] is malformed"
    );
    assert!(!format!("{:?}", err).contains("203.0.113.5"));
}

#[tokio::test]
async fn test_empty_catalog_surfaces_provider_message() {
    let harness = Harness::with_provider(SimulatedProvider::new("us-east-1").with_catalog(vec![]));

    let err = harness.engine.apply(&scenario_plan()).await.unwrap_err();
    assert!(err.to_string().contains("Your query returned no results"));
    assert_eq!(harness.provider.create_count("btc-tracker-instance"), 0);
}

#[tokio::test]
async fn test_instance_without_public_address_fails_outputs() {
    let harness = Harness::new();
    let plan = private_subnet_plan();

    let err = harness.engine.apply(&plan).await.unwrap_err();
    assert!(matches!(
        err,
        Error::MissingAttribute { ref attribute, .. } if attribute == "public_ip"
    ));
    assert!(harness.state.get("vpc").unwrap().is_some());
}

/// A stack whose subnet gives instances no public address.
fn private_subnet_plan() -> StackPlan {
    hand_built_plan(false, &["ami"])
}

/// A minimal stack declared resource by resource. The instance boots from
/// the first image reference; every image reference uses the default filter.
fn hand_built_plan(public_subnet: bool, images: &[&str]) -> StackPlan {
    let mut builder = StackBuilder::new(scenario_inputs());
    let caller = || vec![SourceRange::Caller(SensitiveString::new(CALLER))];

    builder.enter(Phase::Network).unwrap();
    builder
        .declare(Resource::new(
            "vpc",
            ResourceSpec::NetworkBlock(NetworkBlock::with_dns("10.0.0.0/16", Tags::new())),
        ))
        .unwrap();
    builder
        .declare(Resource::new(
            "subnet",
            ResourceSpec::Subnet(Subnet {
                network: "vpc".to_string(),
                cidr_block: "10.0.1.0/24".to_string(),
                availability_zone: None,
                map_public_ip_on_launch: public_subnet,
                tags: Tags::new(),
            }),
        ))
        .unwrap();

    builder.enter(Phase::Access).unwrap();
    builder
        .declare(Resource::new(
            "sg",
            ResourceSpec::AccessPolicy(AccessPolicy {
                network: "vpc".to_string(),
                description: "private".to_string(),
                ingress: vec![IngressRule::tcp(22, caller())],
                egress: vec![EgressRule::allow_all()],
                tags: Tags::new(),
            }),
        ))
        .unwrap();

    builder.enter(Phase::ComputeInputs).unwrap();
    for image in images {
        builder
            .declare(Resource::new(
                *image,
                ResourceSpec::ImageReference(ImageReference {
                    filter: ImageFilter::default(),
                }),
            ))
            .unwrap();
    }
    builder
        .declare(Resource::new(
            "key",
            ResourceSpec::KeyCredential(KeyCredential {
                key_name: "key".to_string(),
                public_key: PUBLIC_KEY.to_string(),
                tags: Tags::new(),
            }),
        ))
        .unwrap();

    builder.enter(Phase::Compute).unwrap();
    builder
        .declare(Resource::new(
            "instance",
            ResourceSpec::ComputeInstance(ComputeInstance {
                instance_type: "t3.micro".to_string(),
                image: images[0].to_string(),
                subnet: "subnet".to_string(),
                access_policies: vec!["sg".to_string()],
                key: "key".to_string(),
                root_volume: RootVolume::default(),
                boot: Default::default(),
                tags: Tags::new(),
            }),
        ))
        .unwrap();

    builder.enter(Phase::Outputs).unwrap();
    builder.finish("instance".to_string()).unwrap()
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_independent_resources_run_concurrently() {
    let harness = Harness::with_provider(
        SimulatedProvider::new("us-east-1").with_latency(Duration::from_millis(20)),
    );
    harness.engine.apply(&scenario_plan()).await.unwrap();

    // vpc and key share the first wave; igw, subnet and sg the second.
    assert!(harness.provider.peak_concurrency() >= 2);
}

#[tokio::test]
async fn test_dependencies_are_created_first() {
    let harness = Harness::new();
    harness.engine.apply(&scenario_plan()).await.unwrap();

    let calls = harness.provider.calls();
    let index = |call: &str| calls.iter().position(|c| c == call).unwrap();

    assert!(index("create:btc-tracker-vpc") < index("create:btc-tracker-subnet"));
    assert!(index("create:btc-tracker-igw") < index("create:btc-tracker-rt"));
    assert!(index("create:btc-tracker-rt") < index("create:btc-tracker-rt-assoc"));
    assert!(index("create:btc-tracker-sg") < index("create:btc-tracker-instance"));
    assert!(index("create:btc-tracker-key") < index("create:btc-tracker-instance"));
}
