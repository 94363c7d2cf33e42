//! # Desired State
//!
//! Builds the seven child objects from the override spec, the operator
//! configuration and the serving material in force.
//!
//! Every object carries the `app=runoncedurationoverride` label, a controller
//! owner reference to the singleton, and the digest of its own desired shape
//! in the `desired.hash` annotation.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::SecondsFormat;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::{json, Value};
use thiserror::Error;

use crate::admission::config::render_configuration;
use crate::config::{ConfigError, OperatorConfig};
use crate::constants::{
    ADMISSION_GROUP, ADMISSION_RESOURCE, ADMISSION_VERSION, CA_CERT_KEY,
    CERT_NOT_AFTER_ANNOTATION, CERT_NOT_BEFORE_ANNOTATION, CONFIGURATION_CONFIGMAP_NAME,
    CONFIGURATION_HASH_ANNOTATION, CONFIGURATION_KEY, CONFIGURATION_MOUNT_PATH,
    DESIRED_HASH_ANNOTATION, NAMESPACE_ENABLED_LABEL, OPERAND_APP_LABEL, OPERAND_NAME,
    OPERAND_SERVICE_ACCOUNT, PREVIOUS_CA_CERT_KEY, SERVICE_CA_CONFIGMAP_NAME, SERVICE_CA_KEY,
    PREVIOUS_CA_NOT_AFTER_ANNOTATION, SERVICE_PORT, SERVING_CERT_HASH_ANNOTATION, SERVING_CERT_MOUNT_PATH,
    SERVING_CERT_SECRET_NAME, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, WEBHOOK_CONFIGURATION_NAME,
    WEBHOOK_CONTAINER_PORT,
};
use crate::controller::cert::ServingCertMaterial;
use crate::controller::hash::{hash_object, HashError};
use crate::controller::sync::ChildKind;
use crate::crd::RunOnceDurationOverrideConfigSpec;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Render(#[from] ConfigError),
}

/// A child object as it should exist in the cluster
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredResource {
    pub kind: ChildKind,
    pub namespace: Option<String>,
    pub name: String,
    /// Full object, including the `desired.hash` annotation
    pub object: Value,
    /// Digest of the object before the annotation was added
    pub fingerprint: String,
}

impl DesiredResource {
    /// Fingerprint `object` and stamp the digest onto its annotations
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the object cannot be serialized.
    pub fn new(
        kind: ChildKind,
        namespace: Option<String>,
        name: impl Into<String>,
        mut object: Value,
    ) -> Result<Self, HashError> {
        let fingerprint = hash_object(&object)?;
        if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            let annotations = meta
                .entry("annotations")
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Some(annotations) = annotations.as_object_mut() {
                annotations.insert(
                    DESIRED_HASH_ANNOTATION.to_string(),
                    Value::String(fingerprint.clone()),
                );
            }
        }
        Ok(Self {
            kind,
            namespace,
            name: name.into(),
            object,
            fingerprint,
        })
    }
}

/// Inputs shared by every child template
#[derive(Debug)]
pub struct ChildTemplates<'a> {
    pub config: &'a OperatorConfig,
    pub owner: OwnerReference,
    pub override_config: &'a RunOnceDurationOverrideConfigSpec,
    pub configuration_hash: &'a str,
    pub material: &'a ServingCertMaterial,
    pub serving_cert_hash: &'a str,
}

impl ChildTemplates<'_> {
    /// Build every child in creation order
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if a document cannot be rendered or hashed.
    pub fn build_all(&self) -> Result<Vec<DesiredResource>, TemplateError> {
        ChildKind::ALL.iter().map(|kind| self.build(*kind)).collect()
    }

    /// Build a single child
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if a document cannot be rendered or hashed.
    pub fn build(&self, kind: ChildKind) -> Result<DesiredResource, TemplateError> {
        let (name, object) = match kind {
            ChildKind::Configuration => (CONFIGURATION_CONFIGMAP_NAME.to_string(), self.configuration()?),
            ChildKind::ServiceCaBundle => (SERVICE_CA_CONFIGMAP_NAME.to_string(), self.service_ca_bundle()),
            ChildKind::Service => (OPERAND_NAME.to_string(), self.service()),
            ChildKind::ServingCertSecret => (SERVING_CERT_SECRET_NAME.to_string(), self.serving_cert_secret()),
            ChildKind::Deployment => (OPERAND_NAME.to_string(), self.deployment()),
            ChildKind::ApiService => (api_service_name(), self.api_service()),
            ChildKind::MutatingWebhook => (WEBHOOK_CONFIGURATION_NAME.to_string(), self.mutating_webhook()),
        };
        let namespace = kind
            .is_namespaced()
            .then(|| self.config.operand_namespace.clone());
        Ok(DesiredResource::new(kind, namespace, name, object)?)
    }

    fn namespace(&self) -> &str {
        &self.config.operand_namespace
    }

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([(OPERAND_APP_LABEL.to_string(), OPERAND_NAME.to_string())])
    }

    fn metadata(&self, name: &str, namespaced: bool) -> Value {
        let mut meta = json!({
            "name": name,
            "labels": Self::labels(),
            "ownerReferences": [self.owner],
        });
        if namespaced {
            meta["namespace"] = Value::String(self.namespace().to_string());
        }
        meta
    }

    fn configuration(&self) -> Result<Value, ConfigError> {
        let document = render_configuration(self.override_config)?;
        Ok(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": self.metadata(CONFIGURATION_CONFIGMAP_NAME, true),
            "data": { CONFIGURATION_KEY: document },
        }))
    }

    fn service_ca_bundle(&self) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": self.metadata(SERVICE_CA_CONFIGMAP_NAME, true),
            "data": { SERVICE_CA_KEY: self.material.ca_bundle() },
        })
    }

    fn service(&self) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": self.metadata(OPERAND_NAME, true),
            "spec": {
                "selector": Self::labels(),
                "ports": [{
                    "name": "https",
                    "port": SERVICE_PORT,
                    "targetPort": WEBHOOK_CONTAINER_PORT,
                    "protocol": "TCP",
                }],
            },
        })
    }

    fn serving_cert_secret(&self) -> Value {
        let material = self.material;
        let mut metadata = self.metadata(SERVING_CERT_SECRET_NAME, true);
        metadata["annotations"] = json!({
            CERT_NOT_BEFORE_ANNOTATION: rfc3339(material.validity.not_before),
            CERT_NOT_AFTER_ANNOTATION: rfc3339(material.validity.not_after),
            // Empty when no previous CA is kept, so a merge patch clears it.
            PREVIOUS_CA_NOT_AFTER_ANNOTATION: material.previous_ca_not_after.map(rfc3339).unwrap_or_default(),
        });
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "kubernetes.io/tls",
            "metadata": metadata,
            "data": {
                TLS_CERT_KEY: STANDARD.encode(&material.cert_pem),
                TLS_PRIVATE_KEY_KEY: STANDARD.encode(&material.key_pem),
                CA_CERT_KEY: STANDARD.encode(&material.ca_pem),
                // Always written so a merge patch clears a stale value.
                PREVIOUS_CA_CERT_KEY: STANDARD.encode(material.previous_ca_pem.as_deref().unwrap_or_default()),
            },
        })
    }

    fn deployment(&self) -> Value {
        let config = self.config;
        let probe = |path: &str| {
            json!({
                "httpGet": {"path": path, "port": WEBHOOK_CONTAINER_PORT, "scheme": "HTTPS"},
                "initialDelaySeconds": 5,
                "periodSeconds": 10,
                "failureThreshold": 3,
            })
        };
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": self.metadata(OPERAND_NAME, true),
            "spec": {
                "replicas": config.operand_replicas,
                "progressDeadlineSeconds": config.rollout_progress_deadline_secs,
                "selector": {"matchLabels": Self::labels()},
                "strategy": {
                    "type": "RollingUpdate",
                    "rollingUpdate": {"maxUnavailable": 1, "maxSurge": 1},
                },
                "template": {
                    "metadata": {
                        "name": OPERAND_NAME,
                        "labels": Self::labels(),
                        // Changing either digest rolls the pods.
                        "annotations": {
                            CONFIGURATION_HASH_ANNOTATION: self.configuration_hash,
                            SERVING_CERT_HASH_ANNOTATION: self.serving_cert_hash,
                        },
                    },
                    "spec": {
                        "serviceAccountName": OPERAND_SERVICE_ACCOUNT,
                        "containers": [{
                            "name": "webhook",
                            "image": config.operand_image,
                            "imagePullPolicy": "IfNotPresent",
                            "args": [
                                format!("--listen-address=0.0.0.0:{WEBHOOK_CONTAINER_PORT}"),
                                format!("--tls-cert-file={SERVING_CERT_MOUNT_PATH}/{TLS_CERT_KEY}"),
                                format!("--tls-key-file={SERVING_CERT_MOUNT_PATH}/{TLS_PRIVATE_KEY_KEY}"),
                                format!("--config-file={CONFIGURATION_MOUNT_PATH}/{CONFIGURATION_KEY}"),
                            ],
                            "env": [
                                {
                                    "name": "POD_NAMESPACE",
                                    "valueFrom": {"fieldRef": {"fieldPath": "metadata.namespace"}},
                                },
                                {"name": "CONFIGMAP_NAME", "value": CONFIGURATION_CONFIGMAP_NAME},
                                {"name": "RUST_LOG", "value": "info"},
                            ],
                            "ports": [{
                                "name": "https",
                                "containerPort": WEBHOOK_CONTAINER_PORT,
                                "protocol": "TCP",
                            }],
                            "readinessProbe": probe("/readyz"),
                            "livenessProbe": probe("/healthz"),
                            "resources": {"requests": {"cpu": "10m", "memory": "50Mi"}},
                            "securityContext": {
                                "allowPrivilegeEscalation": false,
                                "readOnlyRootFilesystem": true,
                                "runAsNonRoot": true,
                                "capabilities": {"drop": ["ALL"]},
                            },
                            "volumeMounts": [
                                {"name": "serving-cert", "mountPath": SERVING_CERT_MOUNT_PATH, "readOnly": true},
                                {"name": "configuration", "mountPath": CONFIGURATION_MOUNT_PATH, "readOnly": true},
                            ],
                        }],
                        "volumes": [
                            {
                                "name": "serving-cert",
                                "secret": {"secretName": SERVING_CERT_SECRET_NAME, "defaultMode": 0o420},
                            },
                            {
                                "name": "configuration",
                                "configMap": {"name": CONFIGURATION_CONFIGMAP_NAME},
                            },
                        ],
                    },
                },
            },
        })
    }

    fn ca_bundle_b64(&self) -> String {
        STANDARD.encode(self.material.ca_bundle())
    }

    fn api_service(&self) -> Value {
        json!({
            "apiVersion": "apiregistration.k8s.io/v1",
            "kind": "APIService",
            "metadata": self.metadata(&api_service_name(), false),
            "spec": {
                "group": ADMISSION_GROUP,
                "version": ADMISSION_VERSION,
                "service": {
                    "namespace": self.namespace(),
                    "name": OPERAND_NAME,
                    "port": SERVICE_PORT,
                },
                "caBundle": self.ca_bundle_b64(),
                "groupPriorityMinimum": 1000,
                "versionPriority": 15,
            },
        })
    }

    fn mutating_webhook(&self) -> Value {
        json!({
            "apiVersion": "admissionregistration.k8s.io/v1",
            "kind": "MutatingWebhookConfiguration",
            "metadata": self.metadata(WEBHOOK_CONFIGURATION_NAME, false),
            "webhooks": [{
                "name": WEBHOOK_CONFIGURATION_NAME,
                "clientConfig": {
                    "service": {
                        "namespace": self.namespace(),
                        "name": OPERAND_NAME,
                        "path": admission_path(),
                        "port": SERVICE_PORT,
                    },
                    "caBundle": self.ca_bundle_b64(),
                },
                "rules": [{
                    "operations": ["CREATE"],
                    "apiGroups": [""],
                    "apiVersions": ["v1"],
                    "resources": ["pods"],
                    "scope": "Namespaced",
                }],
                "failurePolicy": self.config.webhook_failure_policy.as_str(),
                "matchPolicy": "Equivalent",
                "namespaceSelector": {
                    "matchLabels": { NAMESPACE_ENABLED_LABEL: "true" },
                },
                "sideEffects": "None",
                "timeoutSeconds": self.config.webhook_timeout_secs,
                "admissionReviewVersions": ["v1"],
                "reinvocationPolicy": "Never",
            }],
        })
    }
}

/// Name of the aggregated APIService, `<version>.<group>`
#[must_use]
pub fn api_service_name() -> String {
    format!("{ADMISSION_VERSION}.{ADMISSION_GROUP}")
}

/// Path the API server posts admission reviews to
#[must_use]
pub fn admission_path() -> String {
    format!("/apis/{ADMISSION_GROUP}/{ADMISSION_VERSION}/{ADMISSION_RESOURCE}")
}

fn rfc3339(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::rotation::CertValidity;
    use chrono::{TimeZone, Utc};

    fn material() -> ServingCertMaterial {
        let nb = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        ServingCertMaterial {
            ca_pem: "CA".to_string(),
            cert_pem: "CERT".to_string(),
            key_pem: "KEY".to_string(),
            previous_ca_pem: None,
            previous_ca_not_after: None,
            validity: CertValidity::new(nb, nb + chrono::Duration::days(365)),
        }
    }

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "operator.openshift.io/v1".to_string(),
            kind: "RunOnceDurationOverride".to_string(),
            name: "cluster".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: None,
        }
    }

    fn build(kind: ChildKind, deadline: i64) -> DesiredResource {
        let config = OperatorConfig::default();
        let spec = RunOnceDurationOverrideConfigSpec::new(deadline);
        let material = material();
        let templates = ChildTemplates {
            config: &config,
            owner: owner(),
            override_config: &spec,
            configuration_hash: "sha256:config",
            material: &material,
            serving_cert_hash: &material.hash(),
        };
        templates.build(kind).unwrap()
    }

    #[test]
    fn test_every_child_is_labelled_owned_and_fingerprinted() {
        for kind in ChildKind::ALL {
            let desired = build(kind, 60);
            let meta = &desired.object["metadata"];
            assert_eq!(meta["labels"][OPERAND_APP_LABEL], OPERAND_NAME, "{kind}");
            assert_eq!(meta["ownerReferences"][0]["uid"], "uid-1", "{kind}");
            assert_eq!(
                meta["annotations"][DESIRED_HASH_ANNOTATION],
                desired.fingerprint.as_str(),
                "{kind}"
            );
            assert_eq!(meta.get("namespace").is_some(), kind.is_namespaced(), "{kind}");
        }
    }

    #[test]
    fn test_fingerprint_is_stable_and_tracks_config() {
        let a = build(ChildKind::Configuration, 60);
        let b = build(ChildKind::Configuration, 60);
        let c = build(ChildKind::Configuration, 61);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_webhook_targets_pod_creation_in_opted_in_namespaces() {
        let desired = build(ChildKind::MutatingWebhook, 60);
        let webhook = &desired.object["webhooks"][0];
        assert_eq!(webhook["rules"][0]["operations"], json!(["CREATE"]));
        assert_eq!(webhook["rules"][0]["resources"], json!(["pods"]));
        assert_eq!(
            webhook["namespaceSelector"]["matchLabels"][NAMESPACE_ENABLED_LABEL],
            "true"
        );
        assert_eq!(webhook["clientConfig"]["service"]["path"], admission_path());
        assert_eq!(webhook["sideEffects"], "None");
    }

    #[test]
    fn test_deployment_rolls_on_digest_change() {
        let desired = build(ChildKind::Deployment, 60);
        let annotations = &desired.object["spec"]["template"]["metadata"]["annotations"];
        assert_eq!(annotations[CONFIGURATION_HASH_ANNOTATION], "sha256:config");
        assert!(annotations[SERVING_CERT_HASH_ANNOTATION]
            .as_str()
            .unwrap()
            .starts_with("sha256:"));
    }

    #[test]
    fn test_secret_round_trips_material() {
        let desired = build(ChildKind::ServingCertSecret, 60);
        let parsed = ServingCertMaterial::from_secret(&desired.object).unwrap();
        assert_eq!(parsed, material());
    }
}
