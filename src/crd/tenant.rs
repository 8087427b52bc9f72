//! Tenant Custom Resource Definition.
//!
//! A Tenant is a cluster-scoped grouping that owns a dynamic set of namespaces
//! and declares the policy (network policies, limit ranges, resource quotas,
//! node selector, allowed classes) the operator projects into each of them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{LimitRangeSpec, ResourceQuotaSpec};
use k8s_openapi::api::networking::v1::NetworkPolicySpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tenant partitions the cluster into an isolated set of namespaces.
///
/// Example:
/// ```yaml
/// apiVersion: tenancy.smoketurner.com/v1alpha1
/// kind: Tenant
/// metadata:
///   name: oil
/// spec:
///   owner:
///     kind: User
///     name: alice
///   namespaceQuota: 3
///   resourceQuotas:
///     - hard:
///         pods: "10"
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "tenancy.smoketurner.com",
    version = "v1alpha1",
    kind = "Tenant",
    plural = "tenants",
    shortname = "tnt",
    status = "TenantStatus",
    printcolumn = r#"{"name":"Namespace quota", "type":"integer", "jsonPath":".spec.namespaceQuota"}"#,
    printcolumn = r#"{"name":"Namespace count", "type":"integer", "jsonPath":".status.size"}"#,
    printcolumn = r#"{"name":"Owner name", "type":"string", "jsonPath":".spec.owner.name"}"#,
    printcolumn = r#"{"name":"Owner kind", "type":"string", "jsonPath":".spec.owner.kind"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Identity granted administrative rights over every tenant namespace.
    pub owner: OwnerSpec,

    /// Maximum number of namespaces the tenant may own (minimum 1).
    #[serde(default = "default_namespace_quota")]
    #[schemars(range(min = 1))]
    pub namespace_quota: u32,

    /// StorageClasses tenant workloads are allowed to use.
    #[serde(default)]
    pub storage_classes: Vec<String>,

    /// IngressClasses tenant workloads are allowed to use.
    #[serde(default)]
    pub ingress_classes: Vec<String>,

    /// Node selector enforced on every tenant namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// NetworkPolicies replicated into every tenant namespace.
    #[serde(default)]
    pub network_policies: Vec<NetworkPolicySpec>,

    /// LimitRanges replicated into every tenant namespace.
    #[serde(default)]
    pub limit_ranges: Vec<LimitRangeSpec>,

    /// ResourceQuotas enforced as a tenant-wide pool across all namespaces.
    #[serde(default)]
    pub resource_quotas: Vec<ResourceQuotaSpec>,
}

fn default_namespace_quota() -> u32 {
    10
}

impl TenantSpec {
    /// A spec with only an owner; everything else at its default.
    pub fn new(owner: OwnerSpec) -> Self {
        Self {
            owner,
            namespace_quota: default_namespace_quota(),
            storage_classes: Vec::new(),
            ingress_classes: Vec::new(),
            node_selector: None,
            network_policies: Vec::new(),
            limit_ranges: Vec::new(),
            resource_quotas: Vec::new(),
        }
    }
}

/// Owner of a Tenant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSpec {
    /// Kind of the owner identity.
    pub kind: OwnerKind,
    /// Name of the user, group or service account.
    pub name: String,
}

impl OwnerSpec {
    /// Create an owner of the given kind.
    pub fn new(kind: OwnerKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Whether the requester identified by `username` and `groups` is this owner.
    ///
    /// Users and service accounts match on the authenticated username,
    /// groups match on any of the requester's group memberships.
    pub fn matches(&self, username: &str, groups: &[String]) -> bool {
        match self.kind {
            OwnerKind::User | OwnerKind::ServiceAccount => self.name == username,
            OwnerKind::Group => groups.iter().any(|g| *g == self.name),
        }
    }
}

/// Kind of identity owning a Tenant.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum OwnerKind {
    #[default]
    User,
    Group,
    ServiceAccount,
}

impl std::fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerKind::User => write!(f, "User"),
            OwnerKind::Group => write!(f, "Group"),
            OwnerKind::ServiceAccount => write!(f, "ServiceAccount"),
        }
    }
}

/// Observed state of a Tenant. Derived by the controller, never hand-edited.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// Number of namespaces owned by the tenant.
    #[serde(default)]
    pub size: u32,

    /// Sorted names of the namespaces owned by the tenant.
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Users owning the tenant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,

    /// Groups owning the tenant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Conditions describing the outcome of the last reconciliation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Tenant {
    /// Namespaces currently recorded in status.
    pub fn namespaces(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.namespaces.as_slice())
            .unwrap_or_default()
    }

    /// Recorded namespace count.
    pub fn size(&self) -> u32 {
        self.status.as_ref().map(|s| s.size).unwrap_or(0)
    }

    /// Whether the tenant already owns as many namespaces as its quota allows.
    pub fn is_full(&self) -> bool {
        self.size() >= self.spec.namespace_quota
    }

    /// Replace the namespace set in status with the sorted, deduplicated names.
    ///
    /// Also denormalizes the owner into the user or group list.
    pub fn assign_namespaces<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut namespaces: Vec<String> = names.into_iter().collect();
        namespaces.sort();
        namespaces.dedup();

        let owner = self.spec.owner.clone();
        let status = self.status.get_or_insert_with(TenantStatus::default);
        status.namespaces = namespaces;
        status.users.clear();
        status.groups.clear();
        match owner.kind {
            OwnerKind::User | OwnerKind::ServiceAccount => status.users.push(owner.name),
            OwnerKind::Group => status.groups.push(owner.name),
        }
    }
}

/// Condition describes the state of a tenant at a certain point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Whether two conditions describe the same state, ignoring the timestamp.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}
