//! Admission webhook server.
//!
//! Provides HTTP endpoints for Kubernetes admission webhooks:
//!
//! | Path | Kind | Purpose |
//! |------|------|---------|
//! | `/mutate-v1-namespace-owner-reference` | Mutating | assign new namespaces to a tenant |
//! | `/validate-v1-tenant-name` | Validating | tenant name syntax |
//!
//! The webhook server starts automatically when certificates are present.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use k8s_openapi::api::core::v1::Namespace;
use kube::Resource;
use kube::ResourceExt;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::controller::error::Error as ControllerError;
use crate::crd::Tenant;
use crate::health::HealthState;
use crate::store::ObjectStore;
use crate::webhooks::owner_assignment::{Decision, Requester, bind_namespace, decide};
use crate::webhooks::policies::{ValidationContext, ValidationResult, tenant_name, validate_all};

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;

const NAMESPACE_WEBHOOK: &str = "namespace-owner-reference";
const TENANT_NAME_WEBHOOK: &str = "tenant-name";

/// Shared state for webhook handlers
pub struct WebhookState<S: ObjectStore> {
    pub store: S,
    pub config: Arc<OperatorConfig>,
    pub health_state: Option<Arc<HealthState>>,
}

impl<S: ObjectStore> WebhookState<S> {
    pub fn new(
        store: S,
        config: Arc<OperatorConfig>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            store,
            config,
            health_state,
        }
    }

    fn record(&self, webhook: &str, outcome: &str) {
        if let Some(ref health_state) = self.health_state {
            health_state.metrics.record_admission(webhook, outcome);
        }
    }
}

/// Verdict of the namespace webhook on one request.
#[derive(Debug)]
pub enum NamespaceAdmission {
    /// Admit unchanged.
    Allow,
    /// Admit with the patch binding the namespace to `tenant`.
    Bind {
        tenant: String,
        patch: json_patch::Patch,
    },
    /// Refuse.
    Deny { reason: String, message: String },
}

impl NamespaceAdmission {
    fn deny(reason: &str, message: impl Into<String>) -> Self {
        NamespaceAdmission::Deny {
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    fn from_validation(result: ValidationResult) -> Option<Self> {
        if result.allowed {
            return None;
        }
        Some(NamespaceAdmission::deny(
            result.reason.as_deref().unwrap_or("ValidationFailed"),
            result.message.unwrap_or_else(|| "Validation failed".to_string()),
        ))
    }
}

/// Decide admission of a namespace request.
///
/// Only CREATE is checked: protected names first, then owner assignment,
/// then the namespace quota of the chosen tenant.
pub async fn review_namespace<S: ObjectStore>(
    state: &WebhookState<S>,
    request: &AdmissionRequest<Namespace>,
) -> Result<NamespaceAdmission, ControllerError> {
    if request.operation != Operation::Create {
        return Ok(NamespaceAdmission::Allow);
    }
    let Some(namespace) = &request.object else {
        return Ok(NamespaceAdmission::deny(
            "InvalidRequest",
            "Missing object in request",
        ));
    };
    let name = if request.name.is_empty() {
        namespace.name_any()
    } else {
        request.name.clone()
    };

    let mut ctx = ValidationContext {
        namespace: &name,
        tenant: None,
        config: &state.config,
    };
    if let Some(denied) = NamespaceAdmission::from_validation(validate_all(&ctx)) {
        return Ok(denied);
    }

    let requester = Requester::new(
        request.user_info.username.clone().unwrap_or_default(),
        request.user_info.groups.clone().unwrap_or_default(),
    );
    let tenant = match decide(&state.store, &state.config, namespace, &requester).await? {
        Decision::Bind(tenant) => tenant,
        Decision::Deny(message) => {
            return Ok(NamespaceAdmission::deny("OwnerAssignment", message));
        }
    };

    ctx.tenant = Some(tenant.as_ref());
    if let Some(denied) = NamespaceAdmission::from_validation(validate_all(&ctx)) {
        return Ok(denied);
    }

    let before = serde_json::to_value(namespace)?;
    let after = serde_json::to_value(bind_namespace(namespace, &tenant))?;
    Ok(NamespaceAdmission::Bind {
        tenant: tenant.name_any(),
        patch: json_patch::diff(&before, &after),
    })
}

/// Create a denial response with reason embedded in message.
/// kube-rs deny() only sets status.message, so we format as "[reason] message"
fn deny_with_reason<T: Resource<DynamicType = ()>>(
    request: &AdmissionRequest<T>,
    message: &str,
    reason: &str,
) -> AdmissionReview<DynamicObject> {
    let full_message = format!("[{}] {}", reason, message);
    AdmissionResponse::from(request)
        .deny(full_message)
        .into_review()
}

fn invalid_review(e: impl std::fmt::Display) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    error!(error = %e, "Failed to extract admission request");
    (
        StatusCode::BAD_REQUEST,
        Json(AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e)).into_review()),
    )
}

/// Create the webhook router
pub fn create_webhook_router<S: ObjectStore>(state: Arc<WebhookState<S>>) -> Router {
    Router::new()
        .route(
            "/mutate-v1-namespace-owner-reference",
            post(mutate_namespace::<S>),
        )
        .route("/validate-v1-tenant-name", post(validate_tenant_name::<S>))
        .with_state(state)
}

/// Namespace owner assignment webhook handler
async fn mutate_namespace<S: ObjectStore>(
    State(state): State<Arc<WebhookState<S>>>,
    Json(review): Json<AdmissionReview<Namespace>>,
) -> impl IntoResponse {
    let request: AdmissionRequest<Namespace> = match review.try_into() {
        Ok(req) => req,
        Err(e) => return invalid_review(e),
    };

    let uid = &request.uid;
    debug!(
        uid = %uid,
        operation = ?request.operation,
        name = %request.name,
        user = ?request.user_info.username,
        "Processing namespace admission request"
    );

    let review = match review_namespace(&state, &request).await {
        Ok(NamespaceAdmission::Allow) => {
            state.record(NAMESPACE_WEBHOOK, "allowed");
            AdmissionResponse::from(&request).into_review()
        }
        Ok(NamespaceAdmission::Bind { tenant, patch }) => {
            match AdmissionResponse::from(&request).with_patch(patch) {
                Ok(response) => {
                    info!(uid = %uid, namespace = %request.name, tenant = %tenant, "Namespace assigned to tenant");
                    state.record(NAMESPACE_WEBHOOK, "patched");
                    response.into_review()
                }
                Err(e) => {
                    error!(uid = %uid, error = %e, "Failed to serialize namespace patch");
                    state.record(NAMESPACE_WEBHOOK, "error");
                    deny_with_reason(&request, &e.to_string(), "InternalError")
                }
            }
        }
        Ok(NamespaceAdmission::Deny { reason, message }) => {
            warn!(uid = %uid, reason = %reason, message = %message, "Admission request denied");
            state.record(NAMESPACE_WEBHOOK, "denied");
            deny_with_reason(&request, &message, &reason)
        }
        Err(e) => {
            error!(uid = %uid, error = %e, "Namespace admission failed");
            state.record(NAMESPACE_WEBHOOK, "error");
            deny_with_reason(&request, &e.to_string(), "InternalError")
        }
    };
    (StatusCode::OK, Json(review))
}

/// Tenant name validation webhook handler
async fn validate_tenant_name<S: ObjectStore>(
    State(state): State<Arc<WebhookState<S>>>,
    Json(review): Json<AdmissionReview<Tenant>>,
) -> impl IntoResponse {
    let request: AdmissionRequest<Tenant> = match review.try_into() {
        Ok(req) => req,
        Err(e) => return invalid_review(e),
    };

    // DELETE operations are always allowed
    if request.operation == Operation::Delete {
        state.record(TENANT_NAME_WEBHOOK, "allowed");
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(&request).into_review()),
        );
    }

    let name = request
        .object
        .as_ref()
        .map(|t| t.name_any())
        .unwrap_or_else(|| request.name.clone());
    let result = tenant_name::validate(&name);
    if !result.allowed {
        let reason = result
            .reason
            .unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %request.uid, reason = %reason, message = %message, "Admission request denied");
        state.record(TENANT_NAME_WEBHOOK, "denied");
        return (
            StatusCode::OK,
            Json(deny_with_reason(&request, &message, &reason)),
        );
    }

    debug!(uid = %request.uid, tenant = %name, "Tenant name allowed");
    state.record(TENANT_NAME_WEBHOOK, "allowed");
    (
        StatusCode::OK,
        Json(AdmissionResponse::from(&request).into_review()),
    )
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:9443 and serves both admission endpoints.
/// TLS certificates are loaded from the paths specified (PEM format).
pub async fn run_webhook_server<S: ObjectStore>(
    state: WebhookState<S>,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;

    let app = create_webhook_router(Arc::new(state));

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!(port = WEBHOOK_PORT, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
