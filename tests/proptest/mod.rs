// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for tenant-operator.
//!
//! Uses proptest to generate random inputs and verify invariants of quantity
//! arithmetic, quota pool planning and tenant name validation.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ResourceQuota, ResourceQuotaSpec, ResourceQuotaStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use proptest::prelude::*;

use tenant_operator::controller::quota::plan_pool;
use tenant_operator::resources::common::used_quota_annotation;
use tenant_operator::resources::quantity::Amount;
use tenant_operator::webhooks::policies::tenant_name;

/// Strategy for quantity strings in the notations quotas are written in.
fn quantity_string() -> impl Strategy<Value = String> {
    (0u32..100_000, prop_oneof![Just(""), Just("m"), Just("k"), Just("Mi"), Just("Gi")])
        .prop_map(|(n, suffix)| format!("{}{}", n, suffix))
}

/// Strategy for a pool: declared hard limit plus per-sibling usage (None
/// when a sibling reports no usage yet).
fn pool() -> impl Strategy<Value = (u32, Vec<Option<u32>>)> {
    (1u32..100, prop::collection::vec(prop::option::of(0u32..60), 1..6))
}

fn amount(s: &str) -> Amount {
    s.parse().unwrap()
}

fn sibling(index: usize, used: Option<u32>, declared: u32) -> ResourceQuota {
    let used = used
        .map(|u| BTreeMap::from([("pods".to_string(), Quantity(u.to_string()))]))
        .unwrap_or_default();
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some("t-0".to_string()),
            namespace: Some(format!("ns-{}", index)),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(BTreeMap::from([(
                "pods".to_string(),
                Quantity(declared.to_string()),
            )])),
            ..Default::default()
        }),
        status: Some(ResourceQuotaStatus {
            hard: None,
            used: Some(used),
        }),
    }
}

proptest! {
    /// Property: Addition order does not change a sum.
    #[test]
    fn test_sum_is_commutative(a in quantity_string(), b in quantity_string()) {
        let (a, b) = (amount(&a), amount(&b));
        prop_assert_eq!(a.add(&b), b.add(&a));
    }

    /// Property: Grouping does not change a sum.
    #[test]
    fn test_sum_is_associative(
        a in quantity_string(),
        b in quantity_string(),
        c in quantity_string(),
    ) {
        let (a, b, c) = (amount(&a), amount(&b), amount(&c));
        prop_assert_eq!(a.add(&b).add(&c), a.add(&b.add(&c)));
    }

    /// Property: Rendering then parsing preserves the value, and the
    /// rendering is a fixed point.
    #[test]
    fn test_display_is_stable(s in quantity_string()) {
        let parsed = amount(&s);
        let rendered = parsed.to_string();
        let reparsed = amount(&rendered);
        prop_assert_eq!(parsed, reparsed);
        prop_assert_eq!(reparsed.to_string(), rendered);
    }

    /// Property: Zero is the identity of addition.
    #[test]
    fn test_zero_is_identity(s in quantity_string()) {
        let a = amount(&s);
        prop_assert_eq!(a.add(&Amount::zero()), a);
    }

    /// Property: An exhausted pool freezes every sibling at its own usage,
    /// otherwise every sibling gets the declared hard value back.
    #[test]
    fn test_pool_hard_values((declared, used) in pool()) {
        let siblings: Vec<ResourceQuota> = used
            .iter()
            .enumerate()
            .map(|(i, u)| sibling(i, *u, declared))
            .collect();
        let spec = ResourceQuotaSpec {
            hard: Some(BTreeMap::from([(
                "pods".to_string(),
                Quantity(declared.to_string()),
            )])),
            ..Default::default()
        };

        let plan = plan_pool(0, &spec, &siblings, ("ns-0", "t-0")).unwrap();

        let total: u32 = used.iter().flatten().sum();
        let exhausted = total >= declared;
        prop_assert_eq!(plan.usages.len(), 1);
        prop_assert_eq!(plan.usages[0].is_exhausted(), exhausted);
        prop_assert_eq!(plan.updates.len(), siblings.len());

        for (update, u) in plan.updates.iter().zip(&used) {
            let expected = if exhausted { u.unwrap_or(0) } else { declared };
            prop_assert_eq!(amount(&update.hard["pods"].0), amount(&expected.to_string()));
        }
    }

    /// Property: Every sibling carries the pool-wide usage, and only the
    /// target receives the declared spec.
    #[test]
    fn test_pool_annotations((declared, used) in pool()) {
        let siblings: Vec<ResourceQuota> = used
            .iter()
            .enumerate()
            .map(|(i, u)| sibling(i, *u, declared))
            .collect();
        let spec = ResourceQuotaSpec {
            hard: Some(BTreeMap::from([(
                "pods".to_string(),
                Quantity(declared.to_string()),
            )])),
            ..Default::default()
        };

        let plan = plan_pool(0, &spec, &siblings, ("ns-0", "t-0")).unwrap();

        let total: u32 = used.iter().flatten().sum();
        let annotation = used_quota_annotation("pods");
        for update in &plan.updates {
            let recorded = update.annotations.get(&annotation).unwrap();
            prop_assert_eq!(amount(recorded), amount(&total.to_string()));
            prop_assert_eq!(update.declared.is_some(), update.namespace == "ns-0");
        }
    }

    /// Property: Hyphen-joined lower-case words are valid tenant names.
    #[test]
    fn test_tenant_name_valid(name in "[a-z0-9]{1,8}(-[a-z0-9]{1,8}){0,3}") {
        prop_assert!(tenant_name::is_valid(&name));
    }

    /// Property: Upper-case letters and doubled or dangling hyphens are rejected.
    #[test]
    fn test_tenant_name_invalid(
        name in "[a-z0-9]{1,8}",
        bad in prop_oneof![Just("A"), Just("--"), Just("-"), Just("_"), Just(".")],
    ) {
        let candidate = format!("{}{}", name, bad);
        prop_assert!(!tenant_name::is_valid(&candidate));
    }
}
