//! # Readiness
//!
//! Per-kind checks deciding whether a stored child is usable.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::constants::{
    CONFIGURATION_KEY, SERVICE_CA_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use crate::controller::sync::ChildKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Still converging
    Pending(String),
    /// Will not converge without intervention
    Stalled(String),
}

impl Readiness {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Evaluate a stored child of the given kind
#[must_use]
pub fn evaluate(kind: ChildKind, object: &Value) -> Readiness {
    match kind {
        ChildKind::Configuration => decode(object, |cm: ConfigMap| {
            config_map_has_key(&cm, CONFIGURATION_KEY)
        }),
        ChildKind::ServiceCaBundle => {
            decode(object, |cm: ConfigMap| config_map_has_key(&cm, SERVICE_CA_KEY))
        }
        ChildKind::Service => decode(object, |svc: Service| service_readiness(&svc)),
        ChildKind::ServingCertSecret => decode(object, |s: Secret| secret_readiness(&s)),
        ChildKind::Deployment => decode(object, |d: Deployment| deployment_readiness(&d)),
        ChildKind::ApiService => decode(object, |a: APIService| api_service_readiness(&a)),
        ChildKind::MutatingWebhook => {
            decode(object, |w: MutatingWebhookConfiguration| webhook_readiness(&w))
        }
    }
}

fn decode<T: DeserializeOwned>(object: &Value, check: impl FnOnce(T) -> Readiness) -> Readiness {
    match serde_json::from_value::<T>(object.clone()) {
        Ok(typed) => check(typed),
        Err(e) => Readiness::Pending(format!("unable to decode stored object: {e}")),
    }
}

fn config_map_has_key(cm: &ConfigMap, key: &str) -> Readiness {
    let present = cm
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .is_some_and(|v| !v.trim().is_empty());
    if present {
        Readiness::Ready
    } else {
        Readiness::Pending(format!("key '{key}' is missing or empty"))
    }
}

fn service_readiness(svc: &Service) -> Readiness {
    let cluster_ip = svc.spec.as_ref().and_then(|s| s.cluster_ip.as_deref());
    match cluster_ip {
        Some(ip) if !ip.is_empty() => Readiness::Ready,
        _ => Readiness::Pending("cluster IP not yet assigned".to_string()),
    }
}

fn secret_readiness(secret: &Secret) -> Readiness {
    let non_empty = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .is_some_and(|v| !v.0.is_empty())
    };
    if non_empty(TLS_CERT_KEY) && non_empty(TLS_PRIVATE_KEY_KEY) {
        Readiness::Ready
    } else {
        Readiness::Pending("serving certificate or key is empty".to_string())
    }
}

fn deployment_readiness(deployment: &Deployment) -> Readiness {
    let Some(status) = deployment.status.as_ref() else {
        return Readiness::Pending("deployment has no status yet".to_string());
    };

    let stalled = status.conditions.as_ref().and_then(|conditions| {
        conditions.iter().find(|c| {
            c.type_ == "Progressing"
                && c.status == "False"
                && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
        })
    });
    if let Some(condition) = stalled {
        return Readiness::Stalled(format!(
            "rollout exceeded its progress deadline: {}",
            condition.message.as_deref().unwrap_or("no message")
        ));
    }

    let generation = deployment.metadata.generation.unwrap_or(0);
    if status.observed_generation.unwrap_or(0) < generation {
        return Readiness::Pending("waiting for the rollout to be observed".to_string());
    }

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);

    if updated < desired {
        return Readiness::Pending(format!("{updated}/{desired} replicas updated"));
    }
    if total > updated {
        return Readiness::Pending(format!(
            "{} old replicas pending termination",
            total - updated
        ));
    }
    if available < desired {
        return Readiness::Pending(format!("{available}/{desired} replicas available"));
    }
    Readiness::Ready
}

fn api_service_readiness(api_service: &APIService) -> Readiness {
    let Some(spec) = api_service.spec.as_ref() else {
        return Readiness::Pending("APIService has no spec".to_string());
    };
    let has_service = spec
        .service
        .as_ref()
        .and_then(|s| s.name.as_deref())
        .is_some_and(|n| !n.is_empty());
    let has_ca = spec.ca_bundle.as_ref().is_some_and(|b| !b.0.is_empty());
    if !has_service || !has_ca {
        return Readiness::Pending("APIService does not reference the webhook service".to_string());
    }

    let available = api_service
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Available"));
    match available {
        Some(condition) if condition.status != "True" => Readiness::Pending(format!(
            "APIService not available: {}",
            condition.message.as_deref().unwrap_or("no message")
        )),
        _ => Readiness::Ready,
    }
}

fn webhook_readiness(config: &MutatingWebhookConfiguration) -> Readiness {
    let webhooks = config.webhooks.as_deref().unwrap_or_default();
    if webhooks.is_empty() {
        return Readiness::Pending("webhook configuration has no webhooks".to_string());
    }
    let all_wired = webhooks.iter().all(|w| {
        w.client_config.service.is_some()
            && w.client_config
                .ca_bundle
                .as_ref()
                .is_some_and(|b| !b.0.is_empty())
    });
    if all_wired {
        Readiness::Ready
    } else {
        Readiness::Pending("webhook is missing its service reference or CA bundle".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(generation: i64, status: Value) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "d", "generation": generation},
            "spec": {
                "replicas": 2,
                "selector": {"matchLabels": {"app": "x"}},
                "template": {"spec": {"containers": []}}
            },
            "status": status
        })
    }

    #[test]
    fn test_deployment_ready_when_rolled_out() {
        let d = deployment(
            3,
            json!({"observedGeneration": 3, "replicas": 2, "updatedReplicas": 2, "availableReplicas": 2}),
        );
        assert_eq!(evaluate(ChildKind::Deployment, &d), Readiness::Ready);
    }

    #[test]
    fn test_deployment_pending_states() {
        let cases = vec![
            (
                deployment(3, json!({"observedGeneration": 2, "replicas": 2, "updatedReplicas": 2, "availableReplicas": 2})),
                "stale observed generation",
            ),
            (
                deployment(1, json!({"observedGeneration": 1, "replicas": 3, "updatedReplicas": 2, "availableReplicas": 2})),
                "old replica still running",
            ),
            (
                deployment(1, json!({"observedGeneration": 1, "replicas": 2, "updatedReplicas": 2, "availableReplicas": 1})),
                "not all replicas available",
            ),
        ];
        for (d, label) in cases {
            assert!(
                matches!(evaluate(ChildKind::Deployment, &d), Readiness::Pending(_)),
                "{label} should be pending"
            );
        }
    }

    #[test]
    fn test_deployment_stalled_on_progress_deadline() {
        let d = deployment(
            1,
            json!({
                "observedGeneration": 1,
                "conditions": [{
                    "type": "Progressing",
                    "status": "False",
                    "reason": "ProgressDeadlineExceeded",
                    "message": "ReplicaSet has timed out progressing."
                }]
            }),
        );
        assert!(matches!(
            evaluate(ChildKind::Deployment, &d),
            Readiness::Stalled(_)
        ));
    }

    #[test]
    fn test_service_requires_cluster_ip() {
        let pending = json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "s"}, "spec": {}});
        let ready = json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "s"}, "spec": {"clusterIP": "10.0.0.1"}});
        assert!(!evaluate(ChildKind::Service, &pending).is_ready());
        assert!(evaluate(ChildKind::Service, &ready).is_ready());
    }

    #[test]
    fn test_secret_requires_cert_and_key() {
        // "Y2VydA==" is base64 for "cert"
        let partial = json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "s"}, "data": {"tls.crt": "Y2VydA=="}});
        let full = json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "s"}, "data": {"tls.crt": "Y2VydA==", "tls.key": "Y2VydA=="}});
        assert!(!evaluate(ChildKind::ServingCertSecret, &partial).is_ready());
        assert!(evaluate(ChildKind::ServingCertSecret, &full).is_ready());
    }

    #[test]
    fn test_api_service_unavailable_condition() {
        let api_service = json!({
            "apiVersion": "apiregistration.k8s.io/v1",
            "kind": "APIService",
            "metadata": {"name": "v1.x"},
            "spec": {
                "service": {"namespace": "ns", "name": "svc"},
                "caBundle": "Y2VydA==",
                "groupPriorityMinimum": 1000,
                "versionPriority": 15
            },
            "status": {"conditions": [{"type": "Available", "status": "False", "message": "FailedDiscoveryCheck"}]}
        });
        assert!(matches!(
            evaluate(ChildKind::ApiService, &api_service),
            Readiness::Pending(_)
        ));
    }
}
