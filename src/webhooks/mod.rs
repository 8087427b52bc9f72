//! Webhook module for admission requests.
//!
//! - Mutating: namespace creation is assigned to a tenant (owner reference
//!   and tenant label patched in), subject to tiered policies:
//!   - Tier 1 (Name): protected namespace names
//!   - Tier 2 (Tenant): namespace quota of the assigned tenant
//! - Validating: tenant name syntax

pub mod owner_assignment;
pub mod policies;
mod server;

pub use owner_assignment::{Decision, Requester};
pub use policies::{ValidationContext, ValidationResult};
pub use server::{
    NamespaceAdmission, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError,
    WebhookState, create_webhook_router, review_namespace, run_webhook_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
