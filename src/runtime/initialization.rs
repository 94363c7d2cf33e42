//! # Initialization
//!
//! Operator initialization: rustls setup, tracing, metrics, probe server and
//! Kubernetes client.

use crate::config::{create_shared_config, SharedOperatorConfig, SharedServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::RunOnceDurationOverride;
use crate::observability;
use anyhow::{Context, Result};
use kube::{api::Api, Client};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for the cluster-scoped `RunOnceDurationOverride` resources
    pub overrides: Api<RunOnceDurationOverride>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Datadog tracer provider (if initialized)
    pub otel_tracer_provider: Option<observability::otel::TracerProviderHandle>,
    pub operator_config: SharedOperatorConfig,
    pub server_config: SharedServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Install the ring crypto provider for rustls
///
/// Must run before any TLS connection is made. A second install attempt fails
/// harmlessly, so the result is ignored.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Set up tracing export and the log subscriber
///
/// # Errors
///
/// Returns an error if trace export fails to initialize.
pub fn init_telemetry(
    service_name: &str,
    default_filter: &str,
) -> Result<Option<observability::otel::TracerProviderHandle>> {
    let otel_tracer_provider = observability::otel::init_otel(service_name)
        .context("Failed to initialize OpenTelemetry")?;

    // datadog-opentelemetry may already have installed a subscriber
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init()
    {
        warn!("Tracing subscriber init returned error (may already be initialized by Datadog): {}", e);
    }
    Ok(otel_tracer_provider)
}

/// Initialize the operator runtime
pub async fn initialize() -> Result<InitializationResult> {
    install_crypto_provider();

    let otel_tracer_provider = init_telemetry(
        "run-once-duration-override-operator",
        "run_once_duration_override_operator=info",
    )?;

    info!("Starting RunOnceDurationOverride operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let (operator_config, server_config) = create_shared_config();
    {
        let config = operator_config.read().await;
        config
            .validate()
            .context("Invalid operator configuration")?;
        info!(
            "Operator configuration: singleton={}, namespace={}, image={}, replicas={}",
            config.singleton_name,
            config.operand_namespace,
            config.operand_image,
            config.operand_replicas
        );
    }

    let server_state = Arc::new(ServerState::default());
    let server_port = server_config.read().await.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default().await?;
    let overrides: Api<RunOnceDurationOverride> = Api::all(client.clone());
    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        Arc::clone(&operator_config),
    ));

    check_crd_queryable(&overrides, &operator_config).await;

    info!("Operator initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        overrides,
        reconciler,
        server_state,
        otel_tracer_provider,
        operator_config,
        server_config,
    })
}

/// Wait for the HTTP server to become ready
///
/// # Errors
///
/// Fails when the server task exits early or does not bind within the startup timeout.
pub async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &SharedServerConfig,
) -> Result<()> {
    let config = server_config.read().await;
    let startup_timeout = config.startup_timeout();
    let poll_interval = config.poll_interval();
    drop(config);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Log whether the CRD is installed and whether the singleton exists yet
async fn check_crd_queryable(
    overrides: &Api<RunOnceDurationOverride>,
    operator_config: &SharedOperatorConfig,
) {
    let singleton = operator_config.read().await.singleton_name.clone();
    match overrides.get_opt(&singleton).await {
        Ok(Some(_)) => info!("Found RunOnceDurationOverride '{}'", singleton),
        Ok(None) => info!(
            "RunOnceDurationOverride '{}' does not exist yet, the watch will pick it up",
            singleton
        ),
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            warn!("Continuing despite CRD queryability check failure - the watch will retry");
        }
    }
}
