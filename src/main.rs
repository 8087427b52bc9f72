//! tenant-operator - A Kubernetes operator partitioning a cluster into tenants.
//!
//! This is the main entry point that:
//! - Parses command-line configuration
//! - Initializes structured logging
//! - Creates the Kubernetes client and bootstraps cluster RBAC
//! - Runs leader election (when enabled for HA deployments)
//! - Starts the controller, health server, and optionally webhook server

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use tenant_operator::config::Cli;
use tenant_operator::health::{HealthState, run_health_server};
use tenant_operator::rbac::setup_cluster_roles;
use tenant_operator::store::KubeStore;
use tenant_operator::{WebhookState, run_controller, run_webhook_server};

/// Lease configuration
const LEASE_NAME: &str = "tenant-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tenant_operator={}", cli.log_level).parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    info!("Starting tenant-operator");

    // axum-server and kube both pull in rustls; pin the process-wide provider
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    // Configuration errors are fatal
    let config = Arc::new(cli.operator_config()?);
    info!(
        owner_group = %config.tenant_owner_group,
        force_tenant_prefix = config.force_tenant_prefix,
        max_concurrent_updates = config.max_concurrent_updates,
        "Loaded configuration"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    setup_cluster_roles(&KubeStore::new(client.clone()), &config.tenant_owner_group).await?;
    info!("Cluster RBAC in place");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately (probes should work even as non-leader)
    let health_handle = {
        let health_state = health_state.clone();
        let addr = cli.metrics_addr;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, addr).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_renewal_handle = if cli.enable_leader_election {
        Some(acquire_leadership(client.clone()).await)
    } else {
        info!("Leader election disabled");
        None
    };

    // Start controller (only runs as leader)
    let controller_handle = {
        let health_state = health_state.clone();
        let controller_client = client.clone();
        let config = config.clone();
        tokio::spawn(async move {
            run_controller(controller_client, config, Some(health_state)).await;
        })
    };

    // Optionally start webhook server if certificates are available
    let webhook_handle = if cli.webhook_cert_path.exists() && cli.webhook_key_path.exists() {
        info!("TLS certificates found, starting webhook server");
        let state = WebhookState::new(
            KubeStore::new(client.clone()),
            config.clone(),
            Some(health_state.clone()),
        );
        let (cert_path, key_path) = (cli.webhook_cert_path.clone(), cli.webhook_key_path.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = run_webhook_server(state, &cert_path, &key_path).await {
                error!("Webhook server error: {}", e);
            }
        }))
    } else {
        info!("Webhook certificates not found, webhook server disabled");
        None
    };

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = async {
            match webhook_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        // Lease renewal task only exits via process::exit() or panic
        // so this branch is only reached on panic
        result = async {
            match lease_renewal_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("Lease renewal task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready to stop receiving new work
            health_state.set_ready(false).await;
            info!("Marked operator as not ready");

            // Give in-flight reconciliations time to complete
            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Operator stopped");
    Ok(())
}

fn lease_lock(client: Client, namespace: &str, holder_id: String) -> LeaseLock {
    LeaseLock::new(
        client,
        namespace,
        LeaseLockParams {
            holder_id,
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
        },
    )
}

/// Block until this instance holds the lease, then keep renewing it in the
/// background. Losing the lease terminates the process.
#[allow(clippy::exit)]
async fn acquire_leadership(client: Client) -> tokio::task::JoinHandle<()> {
    // Get pod identity for leader election
    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });

    info!(
        holder_id = %pod_name,
        namespace = %namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );

    // Track leadership status
    let is_leader = Arc::new(AtomicBool::new(false));
    let lock = lease_lock(client.clone(), &namespace, pod_name.clone());

    // Acquire leadership before starting controller
    info!("Waiting to acquire leadership...");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) => {
                if result.acquired_lease {
                    info!("Acquired leadership");
                    is_leader.store(true, Ordering::SeqCst);
                    break;
                } else {
                    info!("Another instance is leader, waiting...");
                }
            }
            Err(e) => {
                warn!("Failed to acquire lease: {}, retrying...", e);
            }
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    // Start lease renewal background task
    let lock = lease_lock(client, &namespace, pod_name);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

            match lock.try_acquire_or_renew().await {
                Ok(result) => {
                    if !result.acquired_lease {
                        error!("Lost leadership! Shutting down...");
                        is_leader.store(false, Ordering::SeqCst);
                        // Exit so Kubernetes restarts us and we re-enter election
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    error!("Failed to renew lease: {}. Shutting down...", e);
                    is_leader.store(false, Ordering::SeqCst);
                    std::process::exit(1);
                }
            }
        }
    })
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the operator cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
