//! Conflict retries and aggregated failures.

use k8s_openapi::api::core::v1::{Namespace, ResourceQuota};

use tenant_operator::controller::error::Error;
use tenant_operator::controller::status::{get_condition_reason, is_condition_true};
use tenant_operator::crd::{OwnerKind, OwnerSpec, Tenant};
use tenant_operator::store::MemoryStore;

use crate::fixtures::*;

#[tokio::test]
async fn test_sibling_conflicts_are_retried() {
    let store = MemoryStore::new();
    let tenant = pooled_tenant(&store, &[("pods", "10")]);
    seed_quota(&store, &tenant, "ns-a", 0, &[("pods", "10")], &[("pods", "6")]);
    seed_quota(&store, &tenant, "ns-b", 0, &[("pods", "10")], &[("pods", "6")]);
    store.inject_conflicts::<ResourceQuota>(Some("ns-b"), "t1-0", 2);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    assert_eq!(hard_of(&ctx.store, "ns-b", "t1-0", "pods").as_deref(), Some("6"));
}

#[tokio::test]
async fn test_status_conflicts_are_retried() {
    let store = MemoryStore::new();
    pooled_tenant(&store, &[("pods", "10")]);
    store.inject_conflicts::<Tenant>(None, "t1", 3);
    let ctx = context(store);

    reconcile_tenant(&ctx, "t1").await.unwrap();

    let tenant: Tenant = ctx.store.object(None, "t1").unwrap();
    assert_eq!(tenant.size(), 2);
}

#[tokio::test]
async fn test_failed_sibling_fails_the_whole_pool() {
    let store = MemoryStore::new();
    let tenant = pooled_tenant(&store, &[("pods", "10")]);
    seed_quota(&store, &tenant, "ns-a", 0, &[("pods", "10")], &[("pods", "6")]);
    seed_quota(&store, &tenant, "ns-b", 0, &[("pods", "10")], &[("pods", "6")]);
    store.fail_writes::<ResourceQuota>(Some("ns-b"), "t1-0");
    let ctx = context(store);

    let err = reconcile_tenant(&ctx, "t1").await.unwrap_err();
    assert!(err.is_retryable());

    match err {
        Error::Aggregate {
            operation,
            failed,
            total,
        } => {
            assert_eq!(operation, "update of outer ResourceQuota items");
            assert_eq!(failed, 1);
            assert_eq!(total, 2);
        }
        other => panic!("expected aggregate failure, got {other}"),
    }

    let tenant: Tenant = ctx.store.object(None, "t1").unwrap();
    let conditions = tenant.status.unwrap().conditions;
    assert!(!is_condition_true(&conditions, "Ready"));
    assert_eq!(get_condition_reason(&conditions, "Ready"), Some("ReconcileFailed"));
}

#[tokio::test]
async fn test_failed_namespace_update_aborts_before_later_phases() {
    let store = MemoryStore::new();
    let mut spec = tenant_spec(OwnerSpec::new(OwnerKind::User, "alice"));
    spec.storage_classes = vec!["fast".to_string()];
    spec.resource_quotas = vec![quota_spec(&[("pods", "10")])];
    let tenant = seed_tenant(&store, "t1", spec);
    seed_namespace(&store, "ns-a", &tenant);
    seed_namespace(&store, "ns-b", &tenant);
    store.fail_writes::<Namespace>(None, "ns-b");
    let ctx = context(store);

    let err = reconcile_tenant(&ctx, "t1").await.unwrap_err();

    assert!(matches!(
        &err,
        Error::Aggregate { operation, failed: 1, total: 2 } if operation == "update of tenant Namespaces"
    ));
    // Quota phase never ran
    assert!(ctx.store.objects::<ResourceQuota>(None).is_empty());
}
