//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for per-tenant metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TenantLabels {
    pub tenant: String,
}

impl EncodeLabelSet for TenantLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("tenant", self.tenant.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for quota pool metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct QuotaLabels {
    pub tenant: String,
    pub index: String,
    pub resource: String,
}

impl EncodeLabelSet for QuotaLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("tenant", self.tenant.as_str()).encode(encoder.encode_label())?;
        ("index", self.index.as_str()).encode(encoder.encode_label())?;
        ("resource", self.resource.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for admission decisions
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AdmissionLabels {
    pub webhook: String,
    pub outcome: String,
}

impl EncodeLabelSet for AdmissionLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("webhook", self.webhook.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<TenantLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<TenantLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<TenantLabels, Histogram>,
    /// Namespaces owned per tenant
    pub tenant_namespaces: Family<TenantLabels, Gauge>,
    /// 1 while a tenant-wide quota pool is exhausted for a resource
    pub quota_exhausted: Family<QuotaLabels, Gauge>,
    /// Admission decisions by webhook and outcome
    pub admission_decisions_total: Family<AdmissionLabels, Counter>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<TenantLabels, Counter>::default();
        registry.register(
            "tenant_operator_reconciliations",
            "Total number of tenant reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<TenantLabels, Counter>::default();
        registry.register(
            "tenant_operator_reconciliation_errors",
            "Total number of tenant reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<TenantLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "tenant_operator_reconcile_duration_seconds",
            "Duration of tenant reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let tenant_namespaces = Family::<TenantLabels, Gauge>::default();
        registry.register(
            "tenant_operator_tenant_namespaces",
            "Number of namespaces owned by each tenant",
            tenant_namespaces.clone(),
        );

        let quota_exhausted = Family::<QuotaLabels, Gauge>::default();
        registry.register(
            "tenant_operator_quota_exhausted",
            "Whether a tenant-wide resource quota pool is exhausted",
            quota_exhausted.clone(),
        );

        let admission_decisions_total = Family::<AdmissionLabels, Counter>::default();
        registry.register(
            "tenant_operator_admission_decisions",
            "Total number of admission decisions",
            admission_decisions_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            tenant_namespaces,
            quota_exhausted,
            admission_decisions_total,
            registry,
        }
    }

    fn tenant(name: &str) -> TenantLabels {
        TenantLabels {
            tenant: name.to_string(),
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, tenant: &str, duration_secs: f64) {
        let labels = Self::tenant(tenant);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, tenant: &str) {
        self.reconciliation_errors_total
            .get_or_create(&Self::tenant(tenant))
            .inc();
    }

    /// Update the namespace count of a tenant
    pub fn set_namespace_count(&self, tenant: &str, count: i64) {
        self.tenant_namespaces
            .get_or_create(&Self::tenant(tenant))
            .set(count);
    }

    /// Update the exhaustion state of a quota pool resource.
    ///
    /// Returns whether the pool just became exhausted.
    pub fn set_quota_exhausted(
        &self,
        tenant: &str,
        index: usize,
        resource: &str,
        exhausted: bool,
    ) -> bool {
        let labels = QuotaLabels {
            tenant: tenant.to_string(),
            index: index.to_string(),
            resource: resource.to_string(),
        };
        let previous = self
            .quota_exhausted
            .get_or_create(&labels)
            .set(i64::from(exhausted));
        exhausted && previous == 0
    }

    /// Record an admission decision
    pub fn record_admission(&self, webhook: &str, outcome: &str) {
        let labels = AdmissionLabels {
            webhook: webhook.to_string(),
            outcome: outcome.to_string(),
        };
        self.admission_decisions_total.get_or_create(&labels).inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controller)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
/// This is a simple check - if we can respond, we're alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to `addr` (`--metrics-addr`) and serves health/metrics endpoints.
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    info!(addr = %addr, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
