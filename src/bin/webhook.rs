//! # RunOnceDurationOverride Webhook
//!
//! Mutating admission webhook that sets `spec.activeDeadlineSeconds` on pods
//! whose restart policy is `Never` or `OnFailure`.
//!
//! The configuration is read from the mounted configuration file at startup
//! and, when `--configmap-name` is given, hot-reloaded from that ConfigMap.
//! The readiness probe fails until a configuration has been loaded.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum_server::Handle;
use clap::Parser;
use tracing::{info, warn};

use run_once_duration_override_operator::admission::config::ActiveConfig;
use run_once_duration_override_operator::admission::handler::WebhookState;
use run_once_duration_override_operator::admission::server::{serve, WebhookServerConfig};
use run_once_duration_override_operator::admission::watch::{load_from_file, start_configmap_watch};
use run_once_duration_override_operator::controller::server::ServerState;
use run_once_duration_override_operator::observability::{metrics, otel::shutdown_otel};
use run_once_duration_override_operator::runtime::initialization::{
    init_telemetry, install_crypto_provider,
};
use run_once_duration_override_operator::runtime::signal::shutdown_signal;

#[derive(Parser, Debug)]
#[command(name = "run-once-duration-override-webhook")]
#[command(about = "Admission webhook overriding activeDeadlineSeconds on run-once pods", long_about = None)]
struct Args {
    /// Address the HTTPS listener binds to
    #[arg(long, env = "LISTEN_ADDRESS", default_value = "0.0.0.0:9443")]
    listen_address: SocketAddr,

    /// PEM serving certificate
    #[arg(long, env = "TLS_CERT_FILE", default_value = "/var/serving-cert/tls.crt")]
    tls_cert_file: PathBuf,

    /// PEM private key for the serving certificate
    #[arg(long, env = "TLS_KEY_FILE", default_value = "/var/serving-cert/tls.key")]
    tls_key_file: PathBuf,

    /// Configuration document mounted from the configuration ConfigMap
    #[arg(long, env = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// ConfigMap to hot-reload the configuration from
    #[arg(long, env = "CONFIGMAP_NAME")]
    configmap_name: Option<String>,

    /// Namespace of the ConfigMap
    #[arg(long, env = "POD_NAMESPACE", default_value = "run-once-duration-override")]
    namespace: String,

    /// Seconds between checks of the certificate files for rotation
    #[arg(long, env = "CERT_RELOAD_INTERVAL_SECS", default_value_t = 30)]
    cert_reload_interval_secs: u64,

    /// Seconds in-flight requests get to finish on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    shutdown_grace_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_crypto_provider();
    let args = Args::parse();
    let otel_tracer_provider = init_telemetry(
        "run-once-duration-override-webhook",
        "run_once_duration_override_operator=info",
    )?;
    info!("Starting RunOnceDurationOverride webhook");
    metrics::register_metrics()?;

    let initial = match &args.config_file {
        Some(path) => match load_from_file(path).await {
            Ok(spec) => {
                info!(
                    "Loaded configuration from {}: activeDeadlineSeconds={}",
                    path.display(),
                    spec.active_deadline_seconds
                );
                Some(spec)
            }
            Err(e) if args.configmap_name.is_some() => {
                warn!("Failed to load {}: {}; waiting for ConfigMap", path.display(), e);
                None
            }
            Err(e) => return Err(e).context("Failed to load webhook configuration"),
        },
        None => None,
    };
    if initial.is_none() && args.configmap_name.is_none() {
        anyhow::bail!("either --config-file or --configmap-name must be provided");
    }

    let server_state = Arc::new(ServerState::default());
    server_state.set_ready(initial.is_some());
    let active = ActiveConfig::new(initial);

    if let Some(configmap_name) = &args.configmap_name {
        let client = kube::Client::try_default()
            .await
            .context("Failed to create Kubernetes client for configuration watch")?;
        start_configmap_watch(
            client,
            &args.namespace,
            configmap_name,
            active.clone(),
            Arc::clone(&server_state),
        );
    }

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    let shutdown_state = Arc::clone(&server_state);
    let grace = Duration::from_secs(args.shutdown_grace_secs);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Draining in-flight admission requests...");
        shutdown_state.begin_shutdown();
        shutdown_handle.graceful_shutdown(Some(grace));
    });

    let state = Arc::new(WebhookState {
        config: active,
        server: server_state,
    });
    let config = WebhookServerConfig {
        listen_address: args.listen_address,
        cert_file: args.tls_cert_file,
        key_file: args.tls_key_file,
        cert_reload_interval: Duration::from_secs(args.cert_reload_interval_secs.max(1)),
    };
    let result = serve(config, state, handle).await;

    shutdown_otel(otel_tracer_provider);
    info!("Webhook stopped");
    result
}
