//! # Admission Handler
//!
//! Handles `AdmissionReview` requests for pod creation and answers with the
//! `activeDeadlineSeconds` patch, or with no patch when the pod is left alone.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, Json};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info, warn};

use crate::admission::config::ActiveConfig;
use crate::admission::mutator::{evaluate, patch_for, Mutation};
use crate::controller::server::ServerState;
use crate::observability::metrics;

/// State shared by the admission routes
#[derive(Debug, Clone)]
pub struct WebhookState {
    pub config: ActiveConfig,
    pub server: Arc<ServerState>,
}

/// Handle a mutating admission review for pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let started = Instant::now();
    let req: AdmissionRequest<Pod> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            metrics::increment_admission_requests("invalid");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let (response, outcome) = review(&state.config, &req).await;
    metrics::increment_admission_requests(outcome);
    metrics::observe_admission_duration(started.elapsed().as_secs_f64());
    Json(response.into_review())
}

/// Decide the response for a single request, with the outcome label for metrics
pub async fn review(
    config: &ActiveConfig,
    req: &AdmissionRequest<Pod>,
) -> (AdmissionResponse, &'static str) {
    let uid = req.uid.as_str();

    if req.operation != Operation::Create {
        debug!(uid, operation = ?req.operation, "Not a create request, allowing unchanged");
        return (AdmissionResponse::from(req), "unchanged");
    }
    let Some(pod) = req.object.as_ref() else {
        debug!(uid, "No pod in request, allowing unchanged");
        return (AdmissionResponse::from(req), "unchanged");
    };
    let Some(active) = config.snapshot().await else {
        warn!(uid, "Configuration not loaded, denying pod creation");
        return (
            AdmissionResponse::from(req).deny("run-once duration override configuration is not loaded"),
            "denied",
        );
    };

    match evaluate(pod, &active) {
        Mutation::Unchanged(reason) => {
            debug!(uid, reason = reason.as_str(), "Pod left unchanged");
            (AdmissionResponse::from(req), "unchanged")
        }
        mutation @ Mutation::SetActiveDeadline(seconds) => {
            let Some(patch) = patch_for(mutation) else {
                return (AdmissionResponse::from(req), "unchanged");
            };
            info!(
                uid,
                namespace = req.namespace.as_deref().unwrap_or_default(),
                pod = pod.metadata.name.as_deref().or(pod.metadata.generate_name.as_deref()).unwrap_or_default(),
                active_deadline_seconds = seconds,
                "Setting activeDeadlineSeconds on run-once pod"
            );
            match AdmissionResponse::from(req).with_patch(patch) {
                Ok(response) => (response, "mutated"),
                Err(e) => {
                    error!(uid, error = %e, "Failed to serialize patch");
                    (
                        AdmissionResponse::from(req).deny(format!("patch serialization error: {e}")),
                        "error",
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RunOnceDurationOverrideConfigSpec;
    use serde_json::json;

    fn request(operation: &str, pod: serde_json::Value) -> AdmissionRequest<Pod> {
        let review: AdmissionReview<Pod> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": "jobs",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": pod,
                "dryRun": false
            }
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    fn pod(restart_policy: &str, deadline: Option<i64>) -> serde_json::Value {
        let mut spec = json!({"restartPolicy": restart_policy, "containers": [{"name": "main", "image": "busybox"}]});
        if let Some(d) = deadline {
            spec["activeDeadlineSeconds"] = json!(d);
        }
        json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p"}, "spec": spec})
    }

    #[tokio::test]
    async fn test_run_once_pod_is_patched() {
        let config = ActiveConfig::new(Some(RunOnceDurationOverrideConfigSpec::new(3600)));
        let (response, outcome) = review(&config, &request("CREATE", pod("Never", None))).await;
        assert_eq!(outcome, "mutated");
        assert!(response.allowed);
        assert!(response.patch.is_some());
    }

    #[tokio::test]
    async fn test_explicit_deadline_is_kept() {
        let config = ActiveConfig::new(Some(RunOnceDurationOverrideConfigSpec::new(3600)));
        let (response, outcome) = review(&config, &request("CREATE", pod("OnFailure", Some(50)))).await;
        assert_eq!(outcome, "unchanged");
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_always_pod_is_untouched() {
        let config = ActiveConfig::new(Some(RunOnceDurationOverrideConfigSpec::new(3600)));
        let (response, _) = review(&config, &request("CREATE", pod("Always", None))).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_missing_configuration_denies() {
        let config = ActiveConfig::new(None);
        let (response, outcome) = review(&config, &request("CREATE", pod("Never", None))).await;
        assert_eq!(outcome, "denied");
        assert!(!response.allowed);
    }

    #[tokio::test]
    async fn test_update_is_ignored() {
        let config = ActiveConfig::new(Some(RunOnceDurationOverrideConfigSpec::new(3600)));
        let (response, outcome) = review(&config, &request("UPDATE", pod("Never", None))).await;
        assert_eq!(outcome, "unchanged");
        assert!(response.patch.is_none());
    }
}
