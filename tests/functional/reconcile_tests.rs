//! Full reconcile passes against the in-memory store.

use k8s_openapi::api::core::v1::{LimitRange, Namespace, ResourceQuota};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicySpec};
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use tenant_operator::controller::role_bindings::{ADMIN_BINDING, DELETER_BINDING};
use tenant_operator::controller::status::is_condition_true;
use tenant_operator::crd::{OwnerKind, OwnerSpec, Tenant};
use tenant_operator::resources::common::{
    INGRESS_CLASSES_ANNOTATION, LIMIT_RANGE_LABEL, NODE_SELECTOR_ANNOTATION,
    STORAGE_CLASSES_ANNOTATION, TENANT_LABEL, used_quota_annotation,
};
use tenant_operator::store::MemoryStore;

use crate::fixtures::*;

#[tokio::test]
async fn test_exhausted_pool_freezes_siblings() {
    let store = MemoryStore::new();
    let tenant = pooled_tenant(&store, &[("pods", "10")]);
    seed_quota(&store, &tenant, "ns-a", 0, &[("pods", "10")], &[("pods", "6")]);
    seed_quota(&store, &tenant, "ns-b", 0, &[("pods", "10")], &[("pods", "6")]);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    assert_eq!(hard_of(&ctx.store, "ns-a", "t1-0", "pods").as_deref(), Some("6"));
    assert_eq!(hard_of(&ctx.store, "ns-b", "t1-0", "pods").as_deref(), Some("6"));
    let quota: ResourceQuota = ctx.store.object(Some("ns-a"), "t1-0").unwrap();
    assert_eq!(
        quota.annotations().get(&used_quota_annotation("pods")).map(String::as_str),
        Some("12")
    );
}

#[tokio::test]
async fn test_unlabelled_sibling_rejoins_pool() {
    let store = MemoryStore::new();
    let tenant = pooled_tenant(&store, &[("pods", "10")]);
    let mut stripped = seed_quota(&store, &tenant, "ns-a", 0, &[("pods", "10")], &[("pods", "6")]);
    seed_quota(&store, &tenant, "ns-b", 0, &[("pods", "10")], &[("pods", "6")]);
    stripped.metadata.labels = None;
    store.insert(stripped).unwrap();
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    let quota: ResourceQuota = ctx.store.object(Some("ns-a"), "t1-0").unwrap();
    assert_eq!(quota.labels().get(TENANT_LABEL).map(String::as_str), Some("t1"));
    assert_eq!(hard_of(&ctx.store, "ns-a", "t1-0", "pods").as_deref(), Some("6"));
    assert_eq!(hard_of(&ctx.store, "ns-b", "t1-0", "pods").as_deref(), Some("6"));

    // Stays frozen on the next pass
    reconcile_tenant(&ctx, "t1").await.unwrap();
    assert_eq!(hard_of(&ctx.store, "ns-b", "t1-0", "pods").as_deref(), Some("6"));
}

#[tokio::test]
async fn test_pool_with_headroom_restores_declared_hard() {
    let store = MemoryStore::new();
    let tenant = pooled_tenant(&store, &[("pods", "10")]);
    // Frozen by an earlier exhausted pass
    seed_quota(&store, &tenant, "ns-a", 0, &[("pods", "2")], &[("pods", "2")]);
    seed_quota(&store, &tenant, "ns-b", 0, &[("pods", "3")], &[("pods", "3")]);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    assert_eq!(hard_of(&ctx.store, "ns-a", "t1-0", "pods").as_deref(), Some("10"));
    assert_eq!(hard_of(&ctx.store, "ns-b", "t1-0", "pods").as_deref(), Some("10"));
}

#[tokio::test]
async fn test_used_equal_to_hard_counts_as_exhausted() {
    let store = MemoryStore::new();
    let tenant = pooled_tenant(&store, &[("pods", "10")]);
    seed_quota(&store, &tenant, "ns-a", 0, &[("pods", "10")], &[("pods", "4")]);
    seed_quota(&store, &tenant, "ns-b", 0, &[("pods", "10")], &[("pods", "6")]);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    assert_eq!(hard_of(&ctx.store, "ns-a", "t1-0", "pods").as_deref(), Some("4"));
    assert_eq!(hard_of(&ctx.store, "ns-b", "t1-0", "pods").as_deref(), Some("6"));
}

#[tokio::test]
async fn test_resources_capped_independently() {
    let store = MemoryStore::new();
    let tenant = pooled_tenant(&store, &[("pods", "10"), ("requests.cpu", "4")]);
    let hard = [("pods", "10"), ("requests.cpu", "4")];
    seed_quota(&store, &tenant, "ns-a", 0, &hard, &[("pods", "8"), ("requests.cpu", "500m")]);
    seed_quota(&store, &tenant, "ns-b", 0, &hard, &[("pods", "2"), ("requests.cpu", "1")]);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    assert_eq!(hard_of(&ctx.store, "ns-a", "t1-0", "pods").as_deref(), Some("8"));
    assert_eq!(hard_of(&ctx.store, "ns-a", "t1-0", "requests.cpu").as_deref(), Some("4"));
    let quota: ResourceQuota = ctx.store.object(Some("ns-b"), "t1-0").unwrap();
    assert_eq!(
        quota
            .annotations()
            .get(&used_quota_annotation("requests.cpu"))
            .map(String::as_str),
        Some("1500m")
    );
}

#[tokio::test]
async fn test_new_namespace_gets_quota_created() {
    let store = MemoryStore::new();
    pooled_tenant(&store, &[("pods", "10")]);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    for ns in ["ns-a", "ns-b"] {
        let quota: ResourceQuota = ctx.store.object(Some(ns), "t1-0").unwrap();
        assert_eq!(quota.labels().get(TENANT_LABEL).map(String::as_str), Some("t1"));
        assert_eq!(hard_of(&ctx.store, ns, "t1-0", "pods").as_deref(), Some("10"));
    }
}

#[tokio::test]
async fn test_status_size_matches_namespaces() {
    let store = MemoryStore::new();
    let tenant = pooled_tenant(&store, &[("pods", "10")]);
    seed_namespace(&store, "ns-c", &tenant);
    // Not owned by t1
    store
        .insert(Namespace {
            metadata: ObjectMeta {
                name: Some("elsewhere".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    let tenant: Tenant = ctx.store.object(None, "t1").unwrap();
    let status = tenant.status.unwrap();
    assert_eq!(status.namespaces, vec!["ns-a", "ns-b", "ns-c"]);
    assert_eq!(status.size as usize, status.namespaces.len());
    assert_eq!(status.users, vec!["alice"]);
    assert!(is_condition_true(&status.conditions, "Ready"));
}

#[tokio::test]
async fn test_second_reconcile_writes_nothing() {
    let store = MemoryStore::new();
    let mut spec = tenant_spec(OwnerSpec::new(OwnerKind::Group, "eng"));
    spec.storage_classes = vec!["fast".to_string(), "slow".to_string()];
    spec.ingress_classes = vec!["public".to_string()];
    spec.node_selector = Some([("pool".to_string(), "tenants".to_string())].into());
    spec.network_policies = vec![NetworkPolicySpec {
        pod_selector: LabelSelector::default(),
        policy_types: Some(vec!["Ingress".to_string()]),
        ..Default::default()
    }];
    spec.limit_ranges = vec![limit_range_spec("2")];
    spec.resource_quotas = vec![quota_spec(&[("pods", "10")])];
    let tenant = seed_tenant(&store, "t1", spec);
    seed_namespace(&store, "ns-a", &tenant);
    seed_namespace(&store, "ns-b", &tenant);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();
    assert!(ctx.store.writes() > 0);

    ctx.store.reset_writes();
    reconcile_tenant(&ctx, "t1").await.unwrap();
    assert_eq!(ctx.store.writes(), 0);
}

#[tokio::test]
async fn test_namespaces_labelled_and_annotated() {
    let store = MemoryStore::new();
    let mut spec = tenant_spec(OwnerSpec::new(OwnerKind::User, "alice"));
    spec.storage_classes = vec!["fast".to_string(), "slow".to_string()];
    spec.ingress_classes = vec!["public".to_string()];
    spec.node_selector = Some(
        [
            ("zone".to_string(), "a".to_string()),
            ("pool".to_string(), "tenants".to_string()),
        ]
        .into(),
    );
    let tenant = seed_tenant(&store, "t1", spec);
    seed_namespace(&store, "ns-a", &tenant);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    let ns: Namespace = ctx.store.object(None, "ns-a").unwrap();
    assert_eq!(ns.labels().get(TENANT_LABEL).map(String::as_str), Some("t1"));
    let annotations = ns.annotations();
    assert_eq!(
        annotations.get(STORAGE_CLASSES_ANNOTATION).map(String::as_str),
        Some("fast,slow")
    );
    assert_eq!(
        annotations.get(INGRESS_CLASSES_ANNOTATION).map(String::as_str),
        Some("public")
    );
    assert_eq!(
        annotations.get(NODE_SELECTOR_ANNOTATION).map(String::as_str),
        Some("pool=tenants,zone=a")
    );
}

#[tokio::test]
async fn test_removed_limit_range_index_is_pruned() {
    let store = MemoryStore::new();
    let mut spec = tenant_spec(OwnerSpec::new(OwnerKind::User, "alice"));
    spec.limit_ranges = vec![
        limit_range_spec("1"),
        limit_range_spec("2"),
        limit_range_spec("3"),
    ];
    let tenant = seed_tenant(&store, "t1", spec);
    seed_namespace(&store, "ns-a", &tenant);
    seed_namespace(&store, "ns-b", &tenant);
    // Unmanaged LimitRange in a tenant namespace
    store
        .insert(LimitRange {
            metadata: ObjectMeta {
                name: Some("handmade".to_string()),
                namespace: Some("ns-a".to_string()),
                ..Default::default()
            },
            spec: Some(limit_range_spec("9")),
        })
        .unwrap();
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();
    assert_eq!(ctx.store.objects::<LimitRange>(Some("ns-b")).len(), 3);

    let mut current: Tenant = ctx.store.object(None, "t1").unwrap();
    current.spec.limit_ranges.truncate(2);
    ctx.store.insert(current).unwrap();
    ctx.store.reset_writes();

    reconcile_tenant(&ctx, "t1").await.unwrap();

    for ns in ["ns-a", "ns-b"] {
        let remaining: Vec<String> = ctx
            .store
            .objects::<LimitRange>(Some(ns))
            .iter()
            .filter(|lr| lr.labels().contains_key(LIMIT_RANGE_LABEL))
            .map(|lr| lr.name_any())
            .collect();
        assert_eq!(remaining, vec!["t1-0", "t1-1"]);
    }
    assert!(ctx.store.object::<LimitRange>(Some("ns-a"), "handmade").is_some());
    // Exactly the two index-2 objects
    assert_eq!(ctx.store.writes(), 2);
}

#[tokio::test]
async fn test_drifted_network_policy_is_restored() {
    let store = MemoryStore::new();
    let declared = NetworkPolicySpec {
        pod_selector: LabelSelector::default(),
        policy_types: Some(vec!["Ingress".to_string()]),
        ..Default::default()
    };
    let mut spec = tenant_spec(OwnerSpec::new(OwnerKind::User, "alice"));
    spec.network_policies = vec![declared.clone()];
    let tenant = seed_tenant(&store, "t1", spec);
    seed_namespace(&store, "ns-a", &tenant);
    let ctx = context(store);
    reconcile_tenant(&ctx, "t1").await.unwrap();

    let mut drifted: NetworkPolicy = ctx.store.object(Some("ns-a"), "t1-0").unwrap();
    drifted.spec = Some(NetworkPolicySpec {
        pod_selector: LabelSelector::default(),
        policy_types: Some(vec!["Egress".to_string()]),
        ..Default::default()
    });
    ctx.store.insert(drifted).unwrap();

    reconcile_tenant(&ctx, "t1").await.unwrap();
    let restored: NetworkPolicy = ctx.store.object(Some("ns-a"), "t1-0").unwrap();
    assert_eq!(restored.spec, Some(declared));
}

#[tokio::test]
async fn test_owner_role_bindings_created() {
    let store = MemoryStore::new();
    let tenant = seed_tenant(
        &store,
        "t1",
        tenant_spec(OwnerSpec::new(OwnerKind::Group, "eng")),
    );
    seed_namespace(&store, "ns-a", &tenant);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    let bindings = ctx.store.objects::<RoleBinding>(Some("ns-a"));
    let names: Vec<String> = bindings.iter().map(|rb| rb.name_any()).collect();
    assert_eq!(names, vec![ADMIN_BINDING, DELETER_BINDING]);
    for rb in &bindings {
        let subjects = rb.subjects.as_ref().unwrap();
        assert_eq!(subjects[0].kind, "Group");
        assert_eq!(subjects[0].name, "eng");
    }
}
