//! # Configuration Watch
//!
//! Loads the webhook configuration from its mounted file and hot-reloads it
//! from the configuration ConfigMap.
//!
//! A document that fails to parse never replaces the active configuration;
//! the webhook keeps serving the last good one.

use std::path::Path;
use std::sync::Arc;

use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use kube_runtime::watcher;
use tracing::{debug, error, info, warn};

use crate::admission::config::{parse_configuration, ActiveConfig};
use crate::config::ConfigError;
use crate::constants::CONFIGURATION_KEY;
use crate::controller::server::ServerState;
use crate::crd::RunOnceDurationOverrideConfigSpec;
use crate::observability::metrics;

/// Result of applying a ConfigMap to the active configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Applied,
    Unchanged,
    Rejected(String),
}

impl ReloadOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadOutcome::Applied => "applied",
            ReloadOutcome::Unchanged => "unchanged",
            ReloadOutcome::Rejected(_) => "rejected",
        }
    }
}

/// Read and parse the configuration file mounted into the webhook pod
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDocument`] if the file is unreadable or malformed.
pub async fn load_from_file(path: &Path) -> Result<RunOnceDurationOverrideConfigSpec, ConfigError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        ConfigError::InvalidDocument(format!("cannot read {}: {e}", path.display()))
    })?;
    parse_configuration(&text)
}

/// Extract the configuration from a ConfigMap and swap it in
pub async fn apply_configmap(
    configmap: &ConfigMap,
    active: &ActiveConfig,
    server_state: &ServerState,
) -> ReloadOutcome {
    let Some(text) = configmap
        .data
        .as_ref()
        .and_then(|data| data.get(CONFIGURATION_KEY))
    else {
        return ReloadOutcome::Rejected(format!("ConfigMap has no {CONFIGURATION_KEY} key"));
    };

    match parse_configuration(text) {
        Ok(spec) => {
            let changed = active.replace(spec).await;
            server_state.set_ready(true);
            if changed {
                ReloadOutcome::Applied
            } else {
                ReloadOutcome::Unchanged
            }
        }
        Err(e) => ReloadOutcome::Rejected(e.to_string()),
    }
}

/// Watch the configuration ConfigMap and hot-reload the active configuration
pub fn start_configmap_watch(
    client: kube::Client,
    namespace: &str,
    configmap_name: &str,
    active: ActiveConfig,
    server_state: Arc<ServerState>,
) {
    let namespace = namespace.to_string();
    let configmap_name = configmap_name.to_string();
    tokio::spawn(async move {
        let configmaps: Api<ConfigMap> = Api::namespaced(client, &namespace);
        let watcher_config =
            watcher::Config::default().fields(&format!("metadata.name={configmap_name}"));

        info!(
            "Watching ConfigMap '{}' in namespace '{}' for configuration changes",
            configmap_name, namespace
        );
        let stream = watcher(configmaps, watcher_config);
        pin_mut!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(configmap) | watcher::Event::InitApply(configmap)) => {
                    let outcome = apply_configmap(&configmap, &active, &server_state).await;
                    metrics::increment_configuration_reloads(outcome.as_str());
                    match outcome {
                        ReloadOutcome::Applied => info!("✅ Configuration reloaded from ConfigMap '{}'", configmap_name),
                        ReloadOutcome::Unchanged => debug!("ConfigMap '{}' unchanged", configmap_name),
                        ReloadOutcome::Rejected(reason) => warn!(
                            "Ignoring invalid configuration in ConfigMap '{}': {}",
                            configmap_name, reason
                        ),
                    }
                }
                Ok(watcher::Event::Delete(_)) => {
                    warn!(
                        "ConfigMap '{}' was deleted, keeping the last loaded configuration",
                        configmap_name
                    );
                }
                Ok(watcher::Event::Init | watcher::Event::InitDone) => {}
                Err(e) => {
                    // The watcher retries on its own
                    error!("Error watching ConfigMap: {}", e);
                }
            }
        }

        warn!("ConfigMap watch stream ended");
    });
}
