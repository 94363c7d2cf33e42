//! # RunOnceDurationOverride Operator
//!
//! Installs and maintains the admission webhook that caps the runtime of
//! run-once pods.
//!
//! The operator watches the cluster-scoped `RunOnceDurationOverride` singleton
//! and keeps seven children converged in the operand namespace: the
//! configuration and CA bundle ConfigMaps, the Service, the serving certificate
//! Secret, the webhook Deployment, the APIService and the
//! MutatingWebhookConfiguration. Progress is reported through the
//! `Available` and `InstallReadinessFailure` conditions.
//!
//! ## Environment
//!
//! Settings are read from environment variables; see `config::OperatorConfig`
//! and `config::ServerConfig`. `RUST_LOG` controls log filtering and
//! `DD_API_KEY` enables Datadog trace export.

use anyhow::Result;
use run_once_duration_override_operator::observability::otel::shutdown_otel;
use run_once_duration_override_operator::runtime::{
    initialization::initialize, watch_loop::run_watch_loop,
};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    let result = run_watch_loop(
        init.client,
        init.overrides,
        init.reconciler,
        init.server_state,
        init.operator_config,
    )
    .await;

    shutdown_otel(init.otel_tracer_provider);
    result
}
