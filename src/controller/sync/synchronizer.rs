//! # Resource Synchronizer
//!
//! Ensures a single child matches its desired shape. A child is left alone
//! only when the fingerprint recorded on it matches the desired digest and
//! every desired field is still present with its desired value. Fields added
//! by the API server or other actors are ignored; edits to fields this
//! operator owns are reverted with a merge patch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::DESIRED_HASH_ANNOTATION;
use crate::controller::sync::desired::DesiredResource;
use crate::controller::sync::readiness::{evaluate, Readiness};
use crate::controller::sync::store::{ResourceStore, StoreError};
use crate::controller::sync::ChildKind;
use crate::crd::ResourceReference;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to create {kind} '{name}': {source}")]
    CreateFailed {
        kind: ChildKind,
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to update {kind} '{name}': {source}")]
    UpdateFailed {
        kind: ChildKind,
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("{kind} '{name}' is not ready: {message}")]
    NotReady {
        kind: ChildKind,
        name: String,
        message: String,
    },
}

impl SyncError {
    #[must_use]
    pub fn kind(&self) -> ChildKind {
        match self {
            SyncError::CreateFailed { kind, .. }
            | SyncError::UpdateFailed { kind, .. }
            | SyncError::NotReady { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureAction {
    Created,
    Updated,
    Unchanged,
}

impl EnsureAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsureAction::Created => "created",
            EnsureAction::Updated => "updated",
            EnsureAction::Unchanged => "unchanged",
        }
    }
}

/// Result of ensuring one child
#[derive(Debug, Clone, PartialEq)]
pub struct EnsureOutcome {
    pub kind: ChildKind,
    pub reference: ResourceReference,
    pub ready: bool,
    /// Why the child is not ready yet
    pub detail: Option<String>,
    pub action: EnsureAction,
}

#[derive(Debug, Clone)]
pub struct Synchronizer {
    store: Arc<dyn ResourceStore>,
    timeout: Duration,
}

impl Synchronizer {
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Fetch a child without changing it
    ///
    /// # Errors
    ///
    /// A read failure or timeout is reported as [`SyncError::NotReady`], since
    /// the child's state cannot be determined.
    pub async fn fetch(
        &self,
        kind: ChildKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, SyncError> {
        self.bounded(kind, name, self.store.get(kind, namespace, name))
            .await?
            .map_err(|e| not_ready(kind, name, format!("unable to read: {e}")))
    }

    /// Create, update or leave alone a single child, then report its readiness
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CreateFailed`] or [`SyncError::UpdateFailed`] when
    /// the write is rejected, and [`SyncError::NotReady`] when the store does
    /// not answer in time or the child will not converge on its own.
    pub async fn ensure(&self, desired: &DesiredResource) -> Result<EnsureOutcome, SyncError> {
        let kind = desired.kind;
        let name = desired.name.as_str();
        let namespace = desired.namespace.as_deref();

        let current = self.fetch(kind, namespace, name).await?;
        let (stored, action) = match current {
            None => match self.create(desired).await {
                Ok(created) => (created, EnsureAction::Created),
                // Lost a race with another writer; converge on what is there now.
                Err(SyncError::CreateFailed {
                    source: StoreError::AlreadyExists { .. },
                    ..
                }) => match self.fetch(kind, namespace, name).await? {
                    Some(existing) => self.update_if_drifted(desired, existing).await?,
                    None => {
                        return Err(not_ready(kind, name, "object vanished after conflict"));
                    }
                },
                Err(e) => return Err(e),
            },
            Some(existing) => self.update_if_drifted(desired, existing).await?,
        };

        metrics::increment_child_operations(kind.as_str(), action.as_str());
        if action != EnsureAction::Unchanged {
            info!(
                child.kind = kind.as_str(),
                child.name = name,
                action = action.as_str(),
                "child synchronized"
            );
        }

        let reference = reference_for(kind, &stored, desired);
        match evaluate(kind, &stored) {
            Readiness::Ready => Ok(EnsureOutcome {
                kind,
                reference,
                ready: true,
                detail: None,
                action,
            }),
            Readiness::Pending(detail) => {
                debug!(child.kind = kind.as_str(), %detail, "child not ready yet");
                Ok(EnsureOutcome {
                    kind,
                    reference,
                    ready: false,
                    detail: Some(detail),
                    action,
                })
            }
            Readiness::Stalled(message) => Err(not_ready(kind, name, message)),
        }
    }

    async fn create(&self, desired: &DesiredResource) -> Result<Value, SyncError> {
        let kind = desired.kind;
        let name = desired.name.as_str();
        self.bounded(
            kind,
            name,
            self.store
                .create(kind, desired.namespace.as_deref(), &desired.object),
        )
        .await?
        .map_err(|source| SyncError::CreateFailed {
            kind,
            name: name.to_string(),
            source,
        })
    }

    async fn update_if_drifted(
        &self,
        desired: &DesiredResource,
        existing: Value,
    ) -> Result<(Value, EnsureAction), SyncError> {
        let kind = desired.kind;
        let name = desired.name.as_str();
        let fingerprint_current =
            recorded_fingerprint(&existing) == Some(desired.fingerprint.as_str());
        if fingerprint_current && conforms(&existing, &desired.object) {
            return Ok((existing, EnsureAction::Unchanged));
        }
        if fingerprint_current {
            warn!(
                child.kind = kind.as_str(),
                child.name = name,
                "child edited out of band, restoring desired fields"
            );
        }

        let patched = self
            .bounded(
                kind,
                name,
                self.store.merge_patch(
                    kind,
                    desired.namespace.as_deref(),
                    name,
                    &desired.object,
                ),
            )
            .await?
            .map_err(|source| SyncError::UpdateFailed {
                kind,
                name: name.to_string(),
                source,
            })?;
        Ok((patched, EnsureAction::Updated))
    }

    async fn bounded<T>(
        &self,
        kind: ChildKind,
        name: &str,
        operation: impl Future<Output = T>,
    ) -> Result<T, SyncError> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| {
                not_ready(
                    kind,
                    name,
                    format!("store did not answer within {}s", self.timeout.as_secs()),
                )
            })
    }
}

fn not_ready(kind: ChildKind, name: &str, message: impl Into<String>) -> SyncError {
    SyncError::NotReady {
        kind,
        name: name.to_string(),
        message: message.into(),
    }
}

fn recorded_fingerprint(object: &Value) -> Option<&str> {
    object
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(DESIRED_HASH_ANNOTATION))
        .and_then(Value::as_str)
}

/// Whether `live` carries every field of `desired` with the desired value
///
/// Objects may hold extra keys. Arrays are replaced wholesale by a merge
/// patch, so they must have the same length with every element conforming.
/// A `null` in `desired` requires the field to be absent.
fn conforms(live: &Value, desired: &Value) -> bool {
    match (live, desired) {
        (_, Value::Null) => live.is_null(),
        (Value::Object(live), Value::Object(desired)) => {
            desired.iter().all(|(key, want)| match live.get(key) {
                Some(have) => conforms(have, want),
                None => want.is_null(),
            })
        }
        (Value::Array(live), Value::Array(desired)) => {
            live.len() == desired.len()
                && live.iter().zip(desired).all(|(have, want)| conforms(have, want))
        }
        _ => live == desired,
    }
}

fn reference_for(kind: ChildKind, stored: &Value, desired: &DesiredResource) -> ResourceReference {
    let meta = |field: &str| {
        stored
            .pointer(&format!("/metadata/{field}"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    ResourceReference {
        api_version: kind.api_version(),
        kind: kind.kind().to_string(),
        namespace: if kind.is_namespaced() {
            desired.namespace.clone()
        } else {
            None
        },
        name: desired.name.clone(),
        uid: meta("uid"),
        resource_version: meta("resourceVersion"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recorded_fingerprint() {
        let with = json!({"metadata": {"annotations": {DESIRED_HASH_ANNOTATION: "sha256:abc"}}});
        let without = json!({"metadata": {"name": "x"}});
        assert_eq!(recorded_fingerprint(&with), Some("sha256:abc"));
        assert_eq!(recorded_fingerprint(&without), None);
    }

    #[test]
    fn test_conforms_ignores_server_fields() {
        let desired = json!({
            "metadata": {"name": "svc", "labels": {"app": "x"}},
            "spec": {"ports": [{"port": 443, "targetPort": 9443}]}
        });
        let live = json!({
            "metadata": {"name": "svc", "labels": {"app": "x"}, "uid": "u-1"},
            "spec": {
                "clusterIP": "10.0.0.1",
                "ports": [{"port": 443, "targetPort": 9443, "protocol": "TCP"}]
            },
            "status": {}
        });
        assert!(conforms(&live, &desired));
    }

    #[test]
    fn test_conforms_detects_edited_and_missing_fields() {
        let desired = json!({
            "data": {"k": "v"},
            "webhooks": [{"clientConfig": {"caBundle": "Q0E="}}]
        });
        let edited = json!({"data": {"k": "other"}, "webhooks": [{"clientConfig": {"caBundle": "Q0E="}}]});
        let stripped = json!({"data": {"k": "v"}, "webhooks": [{"clientConfig": {}}]});
        let extra_entry = json!({
            "data": {"k": "v"},
            "webhooks": [{"clientConfig": {"caBundle": "Q0E="}}, {"clientConfig": {}}]
        });
        assert!(!conforms(&edited, &desired));
        assert!(!conforms(&stripped, &desired));
        assert!(!conforms(&extra_entry, &desired));
    }

    #[test]
    fn test_conforms_treats_null_as_absent() {
        let desired = json!({"metadata": {"annotations": {"old": null}}});
        assert!(conforms(&json!({"metadata": {"annotations": {}}}), &desired));
        assert!(!conforms(&json!({"metadata": {"annotations": {"old": "x"}}}), &desired));
    }

    #[test]
    fn test_reference_omits_namespace_for_cluster_scoped() {
        let desired = DesiredResource {
            kind: ChildKind::MutatingWebhook,
            namespace: Some("ns".to_string()),
            name: "hook".to_string(),
            object: json!({}),
            fingerprint: "sha256:0".to_string(),
        };
        let stored = json!({"metadata": {"name": "hook", "uid": "u-1", "resourceVersion": "7"}});
        let reference = reference_for(ChildKind::MutatingWebhook, &stored, &desired);
        assert_eq!(reference.namespace, None);
        assert_eq!(reference.uid.as_deref(), Some("u-1"));
        assert_eq!(reference.resource_version.as_deref(), Some("7"));
        assert_eq!(reference.kind, "MutatingWebhookConfiguration");
    }
}
