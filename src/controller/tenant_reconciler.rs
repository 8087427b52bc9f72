//! Reconciliation loop for Tenant.
//!
//! A reconcile runs the phases below in order and stops at the first error;
//! the controller requeues with the error's backoff.
//!
//! | Phase | Effect |
//! |-------|--------|
//! | collect | `status.namespaces` from namespace owner references |
//! | namespaces | tenant label and class annotations on each namespace |
//! | network policies | projected NetworkPolicies, stale indices pruned |
//! | node selector | scheduler node-selector annotation |
//! | limit ranges | projected LimitRanges, stale indices pruned |
//! | resource quotas | projected ResourceQuotas and tenant-wide pooling |
//! | role bindings | owner RoleBindings |
//! | namespace count | `status.size` |

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::LimitRange;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::namespaces::{collect_namespaces, ensure_node_selector, sync_namespaces};
use crate::controller::quota::{ResourceUsage, sync_resource_quotas};
use crate::controller::role_bindings::sync_owner_role_bindings;
use crate::controller::status::{set_ready_condition, update_namespace_count};
use crate::controller::sync::sync_projections;
use crate::crd::Tenant;
use crate::store::ObjectStore;

/// Periodic resync for a healthy tenant.
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// A step of the tenant reconcile, used to attribute failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    CollectNamespaces,
    SyncNamespaces,
    NetworkPolicies,
    NodeSelector,
    LimitRanges,
    ResourceQuotas,
    RoleBindings,
    NamespaceCount,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::CollectNamespaces => "collect namespaces",
            Phase::SyncNamespaces => "sync namespaces",
            Phase::NetworkPolicies => "sync network policies",
            Phase::NodeSelector => "sync node selector",
            Phase::LimitRanges => "sync limit ranges",
            Phase::ResourceQuotas => "sync resource quotas",
            Phase::RoleBindings => "sync role bindings",
            Phase::NamespaceCount => "update namespace count",
        };
        f.write_str(name)
    }
}

/// What a successful reconcile observed.
#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    pub namespaces: u32,
    pub usages: Vec<ResourceUsage>,
}

fn in_phase<T>(tenant: &str, phase: Phase, result: Result<T>) -> Result<T> {
    result.inspect_err(|e| {
        debug!(tenant = %tenant, phase = %phase, error = %e, "Phase failed");
    })
}

/// Run every phase against `tenant`, aborting on the first error.
pub async fn run_phases<S: ObjectStore>(ctx: &Context<S>, tenant: &Tenant) -> Result<ReconcileReport> {
    let store = &ctx.store;
    let limit = ctx.config.max_concurrent_updates;
    let name = tenant.name_any();
    let name = name.as_str();

    let tenant = in_phase(
        name,
        Phase::CollectNamespaces,
        collect_namespaces(store, tenant).await,
    )?;
    in_phase(
        name,
        Phase::SyncNamespaces,
        sync_namespaces(store, &tenant, limit).await,
    )?;
    in_phase(
        name,
        Phase::NetworkPolicies,
        sync_projections::<NetworkPolicy, S>(store, &tenant).await,
    )?;
    in_phase(
        name,
        Phase::NodeSelector,
        ensure_node_selector(store, &tenant).await,
    )?;
    in_phase(
        name,
        Phase::LimitRanges,
        sync_projections::<LimitRange, S>(store, &tenant).await,
    )?;
    let usages = in_phase(
        name,
        Phase::ResourceQuotas,
        sync_resource_quotas(store, &tenant, limit).await,
    )?;
    in_phase(
        name,
        Phase::RoleBindings,
        sync_owner_role_bindings(store, &tenant).await,
    )?;
    let tenant = in_phase(
        name,
        Phase::NamespaceCount,
        update_namespace_count(store, &tenant).await,
    )?;

    Ok(ReconcileReport {
        namespaces: tenant.size(),
        usages,
    })
}

/// Reconcile a Tenant
///
/// Called by the controller for every change to a tenant or to an object it
/// owns.
pub async fn reconcile<S: ObjectStore>(tenant: Arc<Tenant>, ctx: Arc<Context<S>>) -> Result<Action> {
    let start_time = Instant::now();
    let name = tenant.name_any();

    // Owned objects go with the tenant through garbage collection
    if tenant.metadata.deletion_timestamp.is_some() {
        debug!(tenant = %name, "Tenant is being deleted, nothing to do");
        return Ok(Action::await_change());
    }

    debug!(tenant = %name, "Reconciling Tenant");

    let report = match run_phases(&ctx, &tenant).await {
        Ok(report) => report,
        Err(e) => {
            if !e.is_not_found() {
                record_failure(&ctx, &tenant, &e).await;
            }
            return Err(e);
        }
    };

    let message = format!("{} namespaces reconciled", report.namespaces);
    let transitioned = set_ready_condition(&ctx.store, &tenant, true, "Reconciled", &message).await?;
    if transitioned {
        info!(tenant = %name, namespaces = report.namespaces, "Tenant reconciled");
        ctx.publish_normal_event(&tenant, "Reconciled", "Reconciling", Some(message))
            .await;
    }

    let mut newly_exhausted = Vec::new();
    if let Some(ref health_state) = ctx.health_state {
        let metrics = &health_state.metrics;
        metrics.set_namespace_count(&name, i64::from(report.namespaces));
        for usage in &report.usages {
            if metrics.set_quota_exhausted(&name, usage.index, &usage.resource, usage.is_exhausted())
            {
                newly_exhausted.push(usage);
            }
        }
        metrics.record_reconcile(&name, start_time.elapsed().as_secs_f64());
        let now = jiff::Timestamp::now().as_second();
        health_state
            .last_reconcile
            .store(u64::try_from(now).unwrap_or_default(), Ordering::Relaxed);
    }

    for usage in newly_exhausted {
        warn!(
            tenant = %name,
            index = usage.index,
            resource = %usage.resource,
            used = %usage.used,
            hard = %usage.hard,
            "Tenant quota exhausted"
        );
        ctx.publish_warning_event(
            &tenant,
            "QuotaExhausted",
            "Reconciling",
            Some(format!(
                "resource quota {} exhausted for {}: {} used of {}",
                usage.index, usage.resource, usage.used, usage.hard
            )),
        )
        .await;
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}

async fn record_failure<S: ObjectStore>(ctx: &Context<S>, tenant: &Tenant, error: &Error) {
    let message = error.to_string();
    match set_ready_condition(&ctx.store, tenant, false, "ReconcileFailed", &message).await {
        Ok(true) => {
            ctx.publish_warning_event(tenant, "ReconcileFailed", "Reconciling", Some(message))
                .await;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(tenant = %tenant.name_any(), error = %e, "Failed to record Ready condition");
        }
    }
}

/// Error policy for the controller
///
/// Determines how to handle reconciliation errors.
pub fn error_policy<S: ObjectStore>(tenant: Arc<Tenant>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    let name = tenant.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&name);
    }

    // The tenant was deleted while reconciling; its next event, if any, restarts the loop
    if error.is_not_found() {
        debug!(tenant = %name, error = %error, "Tenant or dependent object gone");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(tenant = %name, error = %error, "Retryable error, will retry");
        Action::requeue(error.requeue_after())
    } else {
        error!(tenant = %name, error = %error, "Permanent error, requeuing with backoff");
        Action::requeue(Duration::from_secs(300))
    }
}
