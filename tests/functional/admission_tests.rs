//! Namespace admission: owner assignment, protected names and namespace quota.

use k8s_openapi::api::core::v1::Namespace;

use tenant_operator::OperatorConfig;
use tenant_operator::crd::{OwnerKind, OwnerSpec, TenantStatus};
use tenant_operator::resources::common::{TENANT_LABEL, is_owned_by};
use tenant_operator::store::MemoryStore;
use tenant_operator::webhooks::{AdmissionRequest, NamespaceAdmission, review_namespace};

use crate::fixtures::*;

fn apply(admission: NamespaceAdmission, request: &AdmissionRequest<Namespace>) -> (String, Namespace) {
    let NamespaceAdmission::Bind { tenant, patch } = admission else {
        panic!("expected a bind, got {admission:?}");
    };
    let mut doc = serde_json::to_value(request.object.as_ref().unwrap()).unwrap();
    json_patch::patch(&mut doc, &patch).unwrap();
    (tenant, serde_json::from_value(doc).unwrap())
}

#[tokio::test]
async fn test_selected_tenant_owned_by_someone_else_is_denied() {
    let store = MemoryStore::new();
    seed_tenant(&store, "t2", tenant_spec(OwnerSpec::new(OwnerKind::User, "alice")));
    let state = webhook_state(store, OperatorConfig::default());

    let request = namespace_request("bobs-ns", &[(TENANT_LABEL, "t2")], "bob", &[]);
    let admission = review_namespace(&state, &request).await.unwrap();

    match admission {
        NamespaceAdmission::Deny { reason, message } => {
            assert_eq!(reason, "OwnerAssignment");
            assert!(message.contains("not an owner"), "{message}");
        }
        other => panic!("expected a deny, got {other:?}"),
    }
}

#[tokio::test]
async fn test_selected_tenant_missing_is_denied() {
    let store = MemoryStore::new();
    let state = webhook_state(store, OperatorConfig::default());

    let request = namespace_request("ns", &[(TENANT_LABEL, "ghost")], "bob", &[]);
    let admission = review_namespace(&state, &request).await.unwrap();

    assert!(matches!(
        admission,
        NamespaceAdmission::Deny { ref message, .. } if message.contains("ghost")
    ));
}

#[tokio::test]
async fn test_forced_prefix_binds_to_group_owned_tenant() {
    let store = MemoryStore::new();
    let t3 = seed_tenant(&store, "t3", tenant_spec(OwnerSpec::new(OwnerKind::Group, "eng")));
    let config = OperatorConfig {
        force_tenant_prefix: true,
        ..Default::default()
    };
    let state = webhook_state(store, config);

    let request = namespace_request("t3-workload", &[], "carol", &["system:authenticated", "eng"]);
    let admission = review_namespace(&state, &request).await.unwrap();

    let (tenant, ns) = apply(admission, &request);
    assert_eq!(tenant, "t3");
    assert!(is_owned_by(&ns.metadata, &t3));
    let labels = ns.metadata.labels.unwrap_or_default();
    assert_eq!(labels.get(TENANT_LABEL).map(String::as_str), Some("t3"));
}

#[tokio::test]
async fn test_forced_prefix_denies_non_owner() {
    let store = MemoryStore::new();
    seed_tenant(&store, "t3", tenant_spec(OwnerSpec::new(OwnerKind::Group, "eng")));
    let config = OperatorConfig {
        force_tenant_prefix: true,
        ..Default::default()
    };
    let state = webhook_state(store, config);

    let request = namespace_request("t3-workload", &[], "mallory", &["ops"]);
    let admission = review_namespace(&state, &request).await.unwrap();

    assert!(matches!(admission, NamespaceAdmission::Deny { .. }));
}

#[tokio::test]
async fn test_single_owned_tenant_is_chosen_without_label() {
    let store = MemoryStore::new();
    let solo = seed_tenant(&store, "solo", tenant_spec(OwnerSpec::new(OwnerKind::User, "alice")));
    seed_tenant(&store, "other", tenant_spec(OwnerSpec::new(OwnerKind::User, "bob")));
    let state = webhook_state(store, OperatorConfig::default());

    let request = namespace_request("scratch", &[], "alice", &[]);
    let admission = review_namespace(&state, &request).await.unwrap();

    let (tenant, ns) = apply(admission, &request);
    assert_eq!(tenant, "solo");
    assert!(is_owned_by(&ns.metadata, &solo));
}

#[tokio::test]
async fn test_requester_without_tenant_is_denied() {
    let store = MemoryStore::new();
    seed_tenant(&store, "t1", tenant_spec(OwnerSpec::new(OwnerKind::User, "alice")));
    let state = webhook_state(store, OperatorConfig::default());

    let request = namespace_request("scratch", &[], "nobody", &[]);
    let admission = review_namespace(&state, &request).await.unwrap();

    assert!(matches!(
        admission,
        NamespaceAdmission::Deny { ref message, .. } if message.contains("contact an administrator")
    ));
}

#[tokio::test]
async fn test_protected_name_is_denied_before_lookup() {
    let store = MemoryStore::new();
    seed_tenant(&store, "t1", tenant_spec(OwnerSpec::new(OwnerKind::User, "alice")));
    let config = OperatorConfig {
        protected_namespaces: Some(regex::Regex::new("^kube-.*").unwrap()),
        ..Default::default()
    };
    let state = webhook_state(store, config);

    let request = namespace_request("kube-extra", &[], "alice", &[]);
    let admission = review_namespace(&state, &request).await.unwrap();

    assert!(matches!(
        admission,
        NamespaceAdmission::Deny { ref reason, .. } if reason == "ProtectedNamespace"
    ));
}

#[tokio::test]
async fn test_full_tenant_is_denied() {
    let store = MemoryStore::new();
    let mut spec = tenant_spec(OwnerSpec::new(OwnerKind::User, "alice"));
    spec.namespace_quota = 2;
    let mut tenant = tenant_operator::crd::Tenant::new("t1", spec);
    tenant.status = Some(TenantStatus {
        size: 2,
        namespaces: vec!["ns-a".to_string(), "ns-b".to_string()],
        ..Default::default()
    });
    store.insert(tenant).unwrap();
    let state = webhook_state(store, OperatorConfig::default());

    let request = namespace_request("ns-c", &[], "alice", &[]);
    let admission = review_namespace(&state, &request).await.unwrap();

    match admission {
        NamespaceAdmission::Deny { reason, message } => {
            assert_eq!(reason, "NamespaceQuotaExceeded");
            assert!(message.contains("2 of 2"), "{message}");
        }
        other => panic!("expected a deny, got {other:?}"),
    }
}

#[tokio::test]
async fn test_update_is_always_allowed() {
    let store = MemoryStore::new();
    let state = webhook_state(store, OperatorConfig::default());

    let mut request = namespace_request("anything", &[], "nobody", &[]);
    request.operation = kube::core::admission::Operation::Update;
    let admission = review_namespace(&state, &request).await.unwrap();

    assert!(matches!(admission, NamespaceAdmission::Allow));
}
