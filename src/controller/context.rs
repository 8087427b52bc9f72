//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler:
//! the object store, the operator configuration, health state and the
//! optional event recorder.

use std::sync::Arc;

use kube::Client;
use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

use crate::config::OperatorConfig;
use crate::crd::Tenant;
use crate::health::HealthState;
use crate::store::ObjectStore;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "tenant-operator";

/// Shared context for the controller
pub struct Context<S: ObjectStore> {
    /// Object store every phase reads and writes through
    pub store: S,
    /// Operator configuration
    pub config: Arc<OperatorConfig>,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Event recorder, absent when running without a cluster
    recorder: Option<Recorder>,
}

impl<S: ObjectStore> Context<S> {
    /// Create a context without event publishing
    pub fn new(
        store: S,
        config: Arc<OperatorConfig>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            store,
            config,
            health_state,
            recorder: None,
        }
    }

    /// Publish Kubernetes events on tenants through `client`
    pub fn with_events(mut self, client: Client) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        self.recorder = Some(Recorder::new(client, reporter));
        self
    }

    /// Publish a normal event for a tenant
    pub async fn publish_normal_event(
        &self,
        tenant: &Tenant,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(tenant, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a tenant
    pub async fn publish_warning_event(
        &self,
        tenant: &Tenant,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(tenant, EventType::Warning, reason, action, note)
            .await;
    }

    async fn publish(
        &self,
        tenant: &Tenant,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let object_ref = tenant.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
