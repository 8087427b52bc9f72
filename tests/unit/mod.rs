// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

//! Unit tests for tenant-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

mod crd_tests {
    use tenant_operator::crd::{Condition, OwnerKind, OwnerSpec, Tenant, TenantSpec};

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "Reconciled", "2 namespaces reconciled", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "Reconciled");
        assert_eq!(condition.observed_generation, Some(1));
    }

    #[test]
    fn test_condition_not_ready() {
        let condition = Condition::ready(false, "ReconcileFailed", "boom", None);
        assert_eq!(condition.status, "False");
        assert!(condition.observed_generation.is_none());
    }

    #[test]
    fn test_same_state_ignores_timestamp() {
        let a = Condition::ready(true, "Reconciled", "ok", Some(3));
        let mut b = a.clone();
        b.last_transition_time = "2020-01-01T00:00:00Z".to_string();
        assert!(a.same_state(&b));

        let c = Condition::ready(true, "Reconciled", "ok", Some(4));
        assert!(!a.same_state(&c));
    }

    #[test]
    fn test_owner_matching() {
        let user = OwnerSpec::new(OwnerKind::User, "alice");
        assert!(user.matches("alice", &[]));
        assert!(!user.matches("bob", &["alice".to_string()]));

        let group = OwnerSpec::new(OwnerKind::Group, "eng");
        assert!(group.matches("anyone", &["ops".to_string(), "eng".to_string()]));
        assert!(!group.matches("eng", &[]));
    }

    #[test]
    fn test_spec_defaults() {
        let spec = TenantSpec::new(OwnerSpec::new(OwnerKind::User, "alice"));
        assert_eq!(spec.namespace_quota, 10);
        assert!(spec.resource_quotas.is_empty());
        assert!(spec.node_selector.is_none());
    }

    #[test]
    fn test_namespace_quota_defaults_when_omitted() {
        let spec: TenantSpec =
            serde_json::from_str(r#"{"owner": {"kind": "Group", "name": "eng"}}"#).unwrap();
        assert_eq!(spec.namespace_quota, 10);
        assert_eq!(spec.owner.kind, OwnerKind::Group);
    }

    #[test]
    fn test_assign_namespaces_sorts_and_dedups() {
        let mut tenant = Tenant::new(
            "t1",
            TenantSpec::new(OwnerSpec::new(OwnerKind::Group, "eng")),
        );
        tenant.assign_namespaces(["b", "a", "b"].map(String::from));
        assert_eq!(tenant.namespaces().to_vec(), vec!["a", "b"]);
        let status = tenant.status.unwrap();
        assert_eq!(status.groups, vec!["eng"]);
        assert!(status.users.is_empty());
    }

    #[test]
    fn test_is_full() {
        let mut spec = TenantSpec::new(OwnerSpec::new(OwnerKind::User, "alice"));
        spec.namespace_quota = 0;
        let tenant = Tenant::new("t1", spec);
        assert!(tenant.is_full());
    }
}

mod resource_tests {
    use tenant_operator::resources::common::{
        LIMIT_RANGE_LABEL, TENANT_LABEL, index_keys, projected_labels, projected_name,
        used_quota_annotation,
    };
    use tenant_operator::resources::quantity::Amount;

    #[test]
    fn test_projected_name() {
        assert_eq!(projected_name("oil", 0), "oil-0");
        assert_eq!(projected_name("oil-and-gas", 12), "oil-and-gas-12");
    }

    #[test]
    fn test_projected_labels() {
        let labels = projected_labels("oil", LIMIT_RANGE_LABEL, 2);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get(TENANT_LABEL).map(String::as_str), Some("oil"));
        assert_eq!(labels.get(LIMIT_RANGE_LABEL).map(String::as_str), Some("2"));
    }

    #[test]
    fn test_index_keys() {
        assert!(index_keys(0).is_empty());
        assert_eq!(index_keys(3), vec!["0", "1", "2"]);
    }

    #[test]
    fn test_used_quota_annotation_escapes_slashes() {
        assert!(used_quota_annotation("requests.cpu").ends_with("used-requests.cpu"));
        assert!(used_quota_annotation("count/pods").ends_with("used-count_pods"));
    }

    #[test]
    fn test_quantity_display_is_canonical() {
        let sum = "500m".parse::<Amount>().unwrap().add(&"1".parse().unwrap());
        assert_eq!(sum.to_string(), "1500m");
        let sum = "512Mi".parse::<Amount>().unwrap().add(&"512Mi".parse().unwrap());
        assert_eq!(sum.to_string(), "1Gi");
        assert_eq!("1000".parse::<Amount>().unwrap().to_string(), "1k");
    }

    #[test]
    fn test_quantity_rejects_garbage() {
        assert!("".parse::<Amount>().is_err());
        assert!("12Q".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
    }
}

mod policy_tests {
    use tenant_operator::webhooks::owner_assignment::prefix_tenant;
    use tenant_operator::webhooks::policies::tenant_name;

    #[test]
    fn test_tenant_names() {
        assert!(tenant_name::is_valid("oil"));
        assert!(tenant_name::is_valid("oil-and-gas"));
        assert!(!tenant_name::is_valid("Oil"));
        assert!(!tenant_name::is_valid("oil--gas"));
        assert_eq!(
            tenant_name::validate("x_y").reason.as_deref(),
            Some("InvalidTenantName")
        );
    }

    #[test]
    fn test_prefix_tenant() {
        assert_eq!(prefix_tenant("oil-production"), "oil");
        assert_eq!(prefix_tenant("oil-and-gas-dev"), "oil");
        assert_eq!(prefix_tenant("oil"), "oil");
    }
}

mod config_tests {
    use clap::Parser;
    use tenant_operator::Cli;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["tenant-operator"]).unwrap();
        let config = cli.operator_config().unwrap();
        assert_eq!(config.tenant_owner_group, "tenancy.smoketurner.com");
        assert!(!config.force_tenant_prefix);
        assert!(config.protected_namespaces.is_none());
        assert_eq!(config.max_concurrent_updates, 8);
    }

    #[test]
    fn test_protected_regex() {
        let cli = Cli::try_parse_from([
            "tenant-operator",
            "--protected-namespace-regex",
            "^kube-.*",
            "--max-concurrent-updates",
            "0",
        ])
        .unwrap();
        let config = cli.operator_config().unwrap();
        assert!(config.is_protected("kube-system"));
        assert!(!config.is_protected("team-a"));
        assert_eq!(config.max_concurrent_updates, 1);
    }

    #[test]
    fn test_invalid_regex_is_an_error() {
        let cli =
            Cli::try_parse_from(["tenant-operator", "--protected-namespace-regex", "("]).unwrap();
        assert!(cli.operator_config().is_err());
    }
}
