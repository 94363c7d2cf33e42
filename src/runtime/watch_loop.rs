//! # Watch Loop
//!
//! Runs the controller over `RunOnceDurationOverride` resources and the
//! children it installs, restarting the watch when the stream fails.

use crate::config::SharedOperatorConfig;
use crate::constants::{OPERAND_APP_LABEL, OPERAND_NAME};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::RunOnceDurationOverride;
use crate::runtime::error_policy::{
    handle_reconciliation_error, handle_watch_stream_error, is_stream_failure,
};
use crate::runtime::signal::shutdown_signal;
use futures::StreamExt;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::Api;
use kube::{Client, Resource};
use kube_runtime::{reflector::ObjectRef, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Map every labelled child to the singleton
fn to_owner<K>(singleton: &str) -> impl Fn(K) -> Option<ObjectRef<RunOnceDurationOverride>> {
    let singleton = singleton.to_string();
    move |_child| Some(ObjectRef::new(&singleton))
}

fn type_key<K: Resource<DynamicType = ()>>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

/// `apiVersion/kind` of every child type the controller watches
fn watched_child_types() -> [String; 6] {
    [
        type_key::<ConfigMap>(),
        type_key::<Secret>(),
        type_key::<Service>(),
        type_key::<Deployment>(),
        type_key::<MutatingWebhookConfiguration>(),
        type_key::<APIService>(),
    ]
}

/// Run the controller watch loop until a shutdown signal arrives
///
/// # Errors
///
/// Currently always returns `Ok`; watch failures restart the loop.
pub async fn run_watch_loop(
    client: Client,
    overrides: Api<RunOnceDurationOverride>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    operator_config: SharedOperatorConfig,
) -> Result<(), anyhow::Error> {
    let config = operator_config.read().await.clone();
    let backoff_duration_ms = Arc::new(AtomicU64::new(config.watch_backoff_start_ms));

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        shutdown_state.begin_shutdown();
    });

    loop {
        if server_state.is_shutting_down() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let config = operator_config.read().await.clone();
        let namespace = config.operand_namespace.clone();
        let singleton = config.singleton_name.clone();
        let children = watcher::Config::default().labels(&format!("{OPERAND_APP_LABEL}={OPERAND_NAME}"));

        let backoff = Arc::clone(&backoff_duration_ms);
        let filter_config = Arc::clone(&operator_config);
        let watch_span = tracing::span!(tracing::Level::INFO, "operator.watch", operation = "watch_loop");
        let _watch_guard = watch_span.enter();

        info!(children = ?watched_child_types(), "Starting controller watch loop...");
        // Children are mapped to the singleton by label rather than owner
        // reference: the owner is cluster-scoped while most children are not.
        Controller::new(overrides.clone(), watcher::Config::default().any_semantic())
            .watches(
                Api::<ConfigMap>::namespaced(client.clone(), &namespace),
                children.clone(),
                to_owner(&singleton),
            )
            .watches(
                Api::<Secret>::namespaced(client.clone(), &namespace),
                children.clone(),
                to_owner(&singleton),
            )
            .watches(
                Api::<Service>::namespaced(client.clone(), &namespace),
                children.clone(),
                to_owner(&singleton),
            )
            .watches(
                Api::<Deployment>::namespaced(client.clone(), &namespace),
                children.clone(),
                to_owner(&singleton),
            )
            .watches(
                Api::<MutatingWebhookConfiguration>::all(client.clone()),
                children.clone(),
                to_owner(&singleton),
            )
            .watches(
                Api::<APIService>::all(client.clone()),
                children,
                to_owner(&singleton),
            )
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                let config = Arc::clone(&filter_config);
                async move {
                    let config = config.read().await.clone();
                    let error_string = match &x {
                        Ok((obj, action)) => {
                            backoff.store(config.watch_backoff_start_ms, Ordering::Relaxed);
                            debug!(resource.name = %obj.name, action = ?action, "watch.event.reconciled");
                            return Some(x);
                        }
                        Err(e) if !is_stream_failure(e) => {
                            debug!(error = %e, "watch.event.requeued");
                            return None;
                        }
                        Err(e) => format!("{e:?}"),
                    };
                    handle_watch_stream_error(
                        &error_string,
                        &backoff,
                        config.watch_backoff_max_ms,
                        config.watch_restart_delay(),
                    )
                    .await
                    .map(|()| x)
                }
            })
            .for_each(|_| futures::future::ready(()))
            .await;

        if server_state.is_shutting_down() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = operator_config.read().await.watch_restart_delay_after_end();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    info!("Operator stopped gracefully");
    Ok(())
}
