//! Operator configuration.
//!
//! Command-line flags (with environment fallbacks) are parsed once at start
//! into an [`OperatorConfig`], which is shared read-only by the controller and
//! the admission webhooks.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use regex::Regex;

use crate::webhooks::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH};

/// Default group whose members may create namespaces.
pub const DEFAULT_OWNER_GROUP: &str = "tenancy.smoketurner.com";

/// Default bound on concurrent object updates within one phase.
pub const DEFAULT_MAX_CONCURRENT_UPDATES: usize = 8;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tenant-operator",
    version,
    about = "Partitions a shared cluster into isolated, policy-enforced tenants"
)]
pub struct Cli {
    /// Address serving /healthz, /readyz and /metrics
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    /// Elect a leader before reconciling, for multi-replica deployments
    #[arg(long, env = "ENABLE_LEADER_ELECTION")]
    pub enable_leader_election: bool,

    /// Group whose members are allowed to create namespaces
    #[arg(long, env = "TENANT_OWNER_GROUP", default_value = DEFAULT_OWNER_GROUP)]
    pub tenant_owner_group: String,

    /// Require namespace names to start with the tenant name followed by '-'
    #[arg(long, env = "FORCE_TENANT_PREFIX")]
    pub force_tenant_prefix: bool,

    /// Namespace names matching this regex cannot be created by tenant owners
    #[arg(long, env = "PROTECTED_NAMESPACE_REGEX")]
    pub protected_namespace_regex: Option<String>,

    /// Maximum concurrent object updates within one reconcile phase
    #[arg(long, env = "MAX_CONCURRENT_UPDATES", default_value_t = DEFAULT_MAX_CONCURRENT_UPDATES)]
    pub max_concurrent_updates: usize,

    /// Admission webhook TLS certificate (PEM)
    #[arg(long, env = "WEBHOOK_CERT_PATH", default_value = WEBHOOK_CERT_PATH)]
    pub webhook_cert_path: PathBuf,

    /// Admission webhook TLS private key (PEM)
    #[arg(long, env = "WEBHOOK_KEY_PATH", default_value = WEBHOOK_KEY_PATH)]
    pub webhook_key_path: PathBuf,

    /// Log level for the operator's own spans and events
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Build the shared configuration, compiling the protected namespace regex.
    pub fn operator_config(&self) -> Result<OperatorConfig, regex::Error> {
        let protected_namespaces = self
            .protected_namespace_regex
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(Regex::new)
            .transpose()?;
        Ok(OperatorConfig {
            tenant_owner_group: self.tenant_owner_group.clone(),
            force_tenant_prefix: self.force_tenant_prefix,
            protected_namespaces,
            max_concurrent_updates: self.max_concurrent_updates.max(1),
        })
    }
}

/// Configuration shared by the controller and the webhooks.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub tenant_owner_group: String,
    pub force_tenant_prefix: bool,
    pub protected_namespaces: Option<Regex>,
    pub max_concurrent_updates: usize,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            tenant_owner_group: DEFAULT_OWNER_GROUP.to_string(),
            force_tenant_prefix: false,
            protected_namespaces: None,
            max_concurrent_updates: DEFAULT_MAX_CONCURRENT_UPDATES,
        }
    }
}

impl OperatorConfig {
    /// Whether a namespace name is reserved by the cluster administrator.
    pub fn is_protected(&self, namespace: &str) -> bool {
        self.protected_namespaces
            .as_ref()
            .is_some_and(|re| re.is_match(namespace))
    }
}
