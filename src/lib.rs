//! tenant-operator library crate
//!
//! This module exports the Tenant controller, CRD definitions, the object
//! store, RBAC bootstrap and the admission webhooks.

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod rbac;
pub mod resources;
pub mod store;
pub mod webhooks;

pub use config::{Cli, OperatorConfig};
pub use health::HealthState;
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState,
    run_webhook_server,
};

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{LimitRange, Namespace, ResourceQuota};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use controller::tenant_reconciler::{error_policy, reconcile};
use crd::Tenant;
use store::KubeStore;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for the controller.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Run the Tenant controller (cluster-wide).
///
/// Watches Tenants and every kind a tenant owns, so that drift in a projected
/// object or a change in quota usage triggers a reconcile of its tenant.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    config: Arc<OperatorConfig>,
    health_state: Option<Arc<HealthState>>,
) {
    info!("Starting controller for Tenant resources (scope: cluster-wide)");

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(
        Context::new(KubeStore::new(client.clone()), config, health_state)
            .with_events(client.clone()),
    );

    let tenants: Api<Tenant> = Api::all(client.clone());
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let network_policies: Api<NetworkPolicy> = scoped_api(client.clone(), None);
    let limit_ranges: Api<LimitRange> = scoped_api(client.clone(), None);
    let resource_quotas: Api<ResourceQuota> = scoped_api(client.clone(), None);
    let role_bindings: Api<RoleBinding> = scoped_api(client, None);

    let watcher_config = default_watcher_config();

    let (reader, tenant_stream) = create_filtered_stream(tenants, watcher_config.clone());

    // Memory optimization: metadata_watcher for owned kinds whose existence is
    // all that matters. ResourceQuota keeps a full watcher since changes in
    // .status.used drive the tenant-wide pool.
    Controller::for_stream(tenant_stream, reader)
        .owns(resource_quotas, watcher_config.clone())
        .owns_stream(metadata_watcher(namespaces, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(network_policies, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(limit_ranges, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(role_bindings, watcher_config).touched_objects())
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Events for objects of a deleted tenant still arrive for a while
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
