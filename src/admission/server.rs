//! # Webhook Server
//!
//! HTTPS server for the admission webhook.
//!
//! Routes:
//! - `POST /mutate` - direct webhook calls
//! - `POST /apis/<group>/v1/runoncedurationoverrides` - calls routed through the aggregator
//! - `GET /apis/<group>/v1` - discovery document for the aggregated group
//! - `/metrics`, `/healthz`, `/readyz` - shared probe routes
//!
//! The serving certificate is read from the mounted secret files and reloaded
//! in place when rotation updates them.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::admission::handler::{mutate_handler, WebhookState};
use crate::constants::{ADMISSION_GROUP, ADMISSION_RESOURCE, ADMISSION_VERSION};
use crate::controller::server::probe_routes;
use crate::controller::sync::desired::admission_path;

/// Where and how the webhook listens
#[derive(Debug, Clone)]
pub struct WebhookServerConfig {
    pub listen_address: SocketAddr,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// How often the certificate files are checked for rotation
    pub cert_reload_interval: Duration,
}

/// Build the webhook router
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route(&admission_path(), post(mutate_handler))
        .route(&discovery_path(), get(discovery_handler))
        .with_state(Arc::clone(&state))
        .merge(probe_routes(Arc::clone(&state.server)))
        .layer(TraceLayer::new_for_http())
}

fn discovery_path() -> String {
    format!("/apis/{ADMISSION_GROUP}/{ADMISSION_VERSION}")
}

/// `APIResourceList` advertised for the aggregated admission group
#[must_use]
pub fn discovery_document() -> Value {
    json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": format!("{ADMISSION_GROUP}/{ADMISSION_VERSION}"),
        "resources": [{
            "name": ADMISSION_RESOURCE,
            "singularName": "runoncedurationoverride",
            "namespaced": false,
            "kind": "AdmissionReview",
            "verbs": ["create"]
        }]
    })
}

async fn discovery_handler() -> Json<Value> {
    Json(discovery_document())
}

/// Serve the webhook over TLS until `handle` is shut down
///
/// # Errors
///
/// Returns an error if the certificate files cannot be loaded or the listener fails.
pub async fn serve(config: WebhookServerConfig, state: Arc<WebhookState>, handle: Handle) -> Result<()> {
    let tls = RustlsConfig::from_pem_file(&config.cert_file, &config.key_file)
        .await
        .with_context(|| {
            format!(
                "Failed to load serving certificate from {} and {}",
                config.cert_file.display(),
                config.key_file.display()
            )
        })?;

    tokio::spawn(reload_certificates(
        tls.clone(),
        config.cert_file.clone(),
        config.key_file.clone(),
        config.cert_reload_interval,
    ));

    info!("🔐 Webhook listening on https://{}", config.listen_address);
    axum_server::bind_rustls(config.listen_address, tls)
        .handle(handle)
        .serve(router(state).into_make_service())
        .await
        .context("Webhook server error")?;
    Ok(())
}

/// Digest of the certificate and key file contents, `None` if either is unreadable
async fn fingerprint_files(cert_file: &Path, key_file: &Path) -> Option<String> {
    let cert = tokio::fs::read(cert_file).await.ok()?;
    let key = tokio::fs::read(key_file).await.ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&cert);
    hasher.update(&key);
    Some(format!("{:x}", hasher.finalize()))
}

async fn reload_certificates(tls: RustlsConfig, cert_file: PathBuf, key_file: PathBuf, interval: Duration) {
    let mut current = fingerprint_files(&cert_file, &key_file).await;
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(latest) = fingerprint_files(&cert_file, &key_file).await else {
            debug!("Serving certificate files not readable, keeping current certificate");
            continue;
        };
        if current.as_deref() == Some(latest.as_str()) {
            continue;
        }
        match tls.reload_from_pem_file(&cert_file, &key_file).await {
            Ok(()) => {
                info!("🔄 Reloaded rotated serving certificate");
                current = Some(latest);
            }
            // Secret volume updates are not atomic across both files; retry next tick
            Err(e) => warn!("Failed to reload serving certificate: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_advertises_admission_resource() {
        let doc = discovery_document();
        assert_eq!(
            doc["groupVersion"],
            "admission.runoncedurationoverride.openshift.io/v1"
        );
        assert_eq!(doc["resources"][0]["name"], "runoncedurationoverrides");
        assert_eq!(doc["resources"][0]["verbs"][0], "create");
    }

    #[test]
    fn test_discovery_path_is_parent_of_admission_path() {
        assert!(admission_path().starts_with(&format!("{}/", discovery_path())));
    }
}
