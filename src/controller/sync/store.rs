//! # Resource Store
//!
//! The narrow slice of the cluster API the reconciler needs. Children are
//! handled as untyped JSON so one code path covers core, apps and aggregated
//! kinds alike.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::constants::FIELD_MANAGER;
use crate::controller::sync::ChildKind;
use crate::crd::{RunOnceDurationOverride, RunOnceDurationOverrideStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },
    #[error("kubernetes API error: {0}")]
    Api(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    fn from_kube(kind: &str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(api_err) if api_err.code == 409 => StoreError::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            other => StoreError::Api(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync + std::fmt::Debug {
    /// Fetch a child, `None` when absent
    async fn get(
        &self,
        kind: ChildKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// Create a child and return the stored object
    async fn create(
        &self,
        kind: ChildKind,
        namespace: Option<&str>,
        object: &Value,
    ) -> Result<Value, StoreError>;

    /// Apply a JSON merge patch and return the stored object
    async fn merge_patch(
        &self,
        kind: ChildKind,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<Value, StoreError>;

    /// Fetch the owning `RunOnceDurationOverride`
    async fn get_owner(&self, name: &str) -> Result<Option<RunOnceDurationOverride>, StoreError>;

    /// Replace the owner's status
    async fn patch_owner_status(
        &self,
        name: &str,
        status: &RunOnceDurationOverrideStatus,
    ) -> Result<(), StoreError>;
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ChildKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(
        &self,
        kind: ChildKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, StoreError> {
        let found = self
            .api(kind, namespace)
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(kind.kind(), name, e))?;
        found
            .map(|obj| serde_json::to_value(obj).map_err(StoreError::from))
            .transpose()
    }

    async fn create(
        &self,
        kind: ChildKind,
        namespace: Option<&str>,
        object: &Value,
    ) -> Result<Value, StoreError> {
        let obj: DynamicObject = serde_json::from_value(object.clone())?;
        let name = obj.metadata.name.clone().unwrap_or_default();
        let created = self
            .api(kind, namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| StoreError::from_kube(kind.kind(), &name, e))?;
        Ok(serde_json::to_value(created)?)
    }

    async fn merge_patch(
        &self,
        kind: ChildKind,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let patched = self
            .api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(kind.kind(), name, e))?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn get_owner(&self, name: &str) -> Result<Option<RunOnceDurationOverride>, StoreError> {
        let api: Api<RunOnceDurationOverride> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube("RunOnceDurationOverride", name, e))
    }

    async fn patch_owner_status(
        &self,
        name: &str,
        status: &RunOnceDurationOverrideStatus,
    ) -> Result<(), StoreError> {
        let api: Api<RunOnceDurationOverride> = Api::all(self.client.clone());
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(json!({ "status": status })),
        )
        .await
        .map_err(|e| StoreError::from_kube("RunOnceDurationOverride", name, e))?;
        Ok(())
    }
}
