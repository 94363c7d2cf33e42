//! Common test utilities for reconciliation tests
//!
//! Provides an in-memory [`ResourceStore`] that behaves like a converging
//! cluster, a deterministic certificate generator, and fixtures for the
//! singleton resource.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use run_once_duration_override_operator::config::OperatorConfig;
use run_once_duration_override_operator::controller::cert::{
    CertError, CertGenerator, ServingCertBundle,
};
use run_once_duration_override_operator::controller::reconciler::Reconciler;
use run_once_duration_override_operator::controller::rotation::CertValidity;
use run_once_duration_override_operator::controller::sync::{ChildKind, ResourceStore, StoreError};
use run_once_duration_override_operator::crd::{
    RunOnceDurationOverride, RunOnceDurationOverrideConfigSpec, RunOnceDurationOverrideSpec,
    RunOnceDurationOverrideStatus,
};

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Fixed reference instant, on a whole second
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A write the store accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Create(ChildKind),
    Patch(ChildKind),
}

impl WriteOp {
    pub fn kind(&self) -> ChildKind {
        match self {
            WriteOp::Create(kind) | WriteOp::Patch(kind) => *kind,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(ChildKind, String), Value>,
    writes: Vec<WriteOp>,
    owner: Option<RunOnceDurationOverride>,
    status_writes: u32,
    next_uid: u64,
    /// Creates of this kind fail with an API error
    fail_creates_of: Option<ChildKind>,
    /// Patches of this kind fail with an API error
    fail_patches_of: Option<ChildKind>,
    /// The owner disappears once this many child writes have happened
    delete_owner_after_writes: Option<usize>,
    /// Deployments report a stalled rollout
    stall_deployments: bool,
    /// Deployments never report available replicas
    hold_deployments: bool,
}

/// In-memory stand-in for the cluster
///
/// Services get a cluster IP on create and Deployments roll out immediately,
/// unless told otherwise.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn with_owner(owner: RunOnceDurationOverride) -> Arc<Self> {
        let store = Self::default();
        store.state.lock().unwrap().owner = Some(owner);
        Arc::new(store)
    }

    pub fn owner(&self) -> Option<RunOnceDurationOverride> {
        self.state.lock().unwrap().owner.clone()
    }

    pub fn status(&self) -> RunOnceDurationOverrideStatus {
        self.owner()
            .and_then(|o| o.status)
            .unwrap_or_default()
    }

    pub fn object(&self, kind: ChildKind, name: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(kind, name.to_string()))
            .cloned()
    }

    pub fn only(&self, kind: ChildKind) -> Value {
        let state = self.state.lock().unwrap();
        let mut matching = state.objects.iter().filter(|((k, _), _)| *k == kind);
        let (_, object) = matching.next().expect("child present");
        assert!(matching.next().is_none(), "exactly one {kind}");
        object.clone()
    }

    pub fn kinds_present(&self) -> Vec<ChildKind> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn writes(&self) -> Vec<WriteOp> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        let mut state = self.state.lock().unwrap();
        state.writes.clear();
        state.status_writes = 0;
    }

    pub fn status_writes(&self) -> u32 {
        self.state.lock().unwrap().status_writes
    }

    pub fn remove(&self, kind: ChildKind) {
        self.state
            .lock()
            .unwrap()
            .objects
            .retain(|(k, _), _| *k != kind);
    }

    /// Change a stored object out of band
    pub fn tamper(&self, kind: ChildKind, patch: &Value) {
        let mut state = self.state.lock().unwrap();
        let object = state
            .objects
            .iter_mut()
            .find(|((k, _), _)| *k == kind)
            .map(|(_, v)| v)
            .expect("child present");
        json_patch::merge(object, patch);
    }

    pub fn delete_owner(&self) {
        self.state.lock().unwrap().owner = None;
    }

    pub fn update_owner_spec(&self, deadline: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(owner) = state.owner.as_mut() {
            owner.spec = spec(deadline);
            owner.metadata.generation = Some(owner.metadata.generation.unwrap_or(0) + 1);
        }
    }

    pub fn fail_creates_of(&self, kind: Option<ChildKind>) {
        self.state.lock().unwrap().fail_creates_of = kind;
    }

    pub fn fail_patches_of(&self, kind: Option<ChildKind>) {
        self.state.lock().unwrap().fail_patches_of = kind;
    }

    pub fn delete_owner_after_writes(&self, writes: usize) {
        self.state.lock().unwrap().delete_owner_after_writes = Some(writes);
    }

    pub fn stall_deployments(&self, stalled: bool) {
        self.state.lock().unwrap().stall_deployments = stalled;
    }

    pub fn hold_deployments(&self, held: bool) {
        self.state.lock().unwrap().hold_deployments = held;
    }
}

impl State {
    fn record(&mut self, op: WriteOp) {
        self.writes.push(op);
        if self
            .delete_owner_after_writes
            .is_some_and(|limit| self.writes.len() >= limit)
        {
            self.owner = None;
        }
    }

    /// Play the part of the cluster's own controllers
    fn settle(&self, kind: ChildKind, object: &mut Value) {
        match kind {
            ChildKind::Service => {
                if object["spec"]["clusterIP"].is_null() {
                    object["spec"]["clusterIP"] = json!("10.96.0.42");
                }
            }
            ChildKind::Deployment => {
                let generation = object["metadata"]["generation"].as_i64().unwrap_or(1);
                let replicas = object["spec"]["replicas"].as_i64().unwrap_or(1);
                object["status"] = if self.stall_deployments {
                    json!({
                        "observedGeneration": generation,
                        "conditions": [{
                            "type": "Progressing",
                            "status": "False",
                            "reason": "ProgressDeadlineExceeded",
                            "message": "ReplicaSet has timed out progressing."
                        }]
                    })
                } else if self.hold_deployments {
                    json!({
                        "observedGeneration": generation,
                        "replicas": replicas,
                        "updatedReplicas": replicas,
                        "availableReplicas": 0
                    })
                } else {
                    json!({
                        "observedGeneration": generation,
                        "replicas": replicas,
                        "updatedReplicas": replicas,
                        "availableReplicas": replicas,
                        "readyReplicas": replicas
                    })
                };
            }
            _ => {}
        }
    }
}

fn name_of(object: &Value) -> String {
    object["metadata"]["name"].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(
        &self,
        kind: ChildKind,
        _namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self.object(kind, name))
    }

    async fn create(
        &self,
        kind: ChildKind,
        _namespace: Option<&str>,
        object: &Value,
    ) -> Result<Value, StoreError> {
        let mut state = self.state.lock().unwrap();
        let name = name_of(object);
        if state.fail_creates_of == Some(kind) {
            return Err(StoreError::Api(format!("admission denied creating {name}")));
        }
        let key = (kind, name.clone());
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind.kind().to_string(),
                name,
            });
        }

        state.next_uid += 1;
        let mut stored = object.clone();
        stored["metadata"]["uid"] = json!(format!("child-uid-{}", state.next_uid));
        stored["metadata"]["resourceVersion"] = json!("1");
        stored["metadata"]["generation"] = json!(1);
        state.settle(kind, &mut stored);

        state.objects.insert(key, stored.clone());
        state.record(WriteOp::Create(kind));
        Ok(stored)
    }

    async fn merge_patch(
        &self,
        kind: ChildKind,
        _namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_patches_of == Some(kind) {
            return Err(StoreError::Api(format!("admission denied patching {name}")));
        }
        let key = (kind, name.to_string());
        let Some(mut stored) = state.objects.get(&key).cloned() else {
            return Err(StoreError::NotFound {
                kind: kind.kind().to_string(),
                name: name.to_string(),
            });
        };

        json_patch::merge(&mut stored, patch);
        let version = stored["metadata"]["resourceVersion"]
            .as_str()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        stored["metadata"]["resourceVersion"] = json!((version + 1).to_string());
        if kind == ChildKind::Deployment {
            let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
            stored["metadata"]["generation"] = json!(generation + 1);
        }
        state.settle(kind, &mut stored);

        state.objects.insert(key, stored.clone());
        state.record(WriteOp::Patch(kind));
        Ok(stored)
    }

    async fn get_owner(&self, name: &str) -> Result<Option<RunOnceDurationOverride>, StoreError> {
        Ok(self
            .owner()
            .filter(|o| o.metadata.name.as_deref() == Some(name)))
    }

    async fn patch_owner_status(
        &self,
        name: &str,
        status: &RunOnceDurationOverrideStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(owner) = state.owner.as_mut() else {
            return Err(StoreError::NotFound {
                kind: "RunOnceDurationOverride".to_string(),
                name: name.to_string(),
            });
        };
        owner.status = Some(status.clone());
        state.status_writes += 1;
        Ok(())
    }
}

/// Certificate generator producing recognisable fake PEM
#[derive(Debug, Default)]
pub struct FakeCertGenerator {
    issued: AtomicU32,
}

impl FakeCertGenerator {
    pub fn issued(&self) -> u32 {
        self.issued.load(Ordering::SeqCst)
    }
}

fn fake_pem(label: &str, serial: u32) -> String {
    format!("-----BEGIN {label}-----\n{label}-{serial}\n-----END {label}-----\n")
}

impl CertGenerator for FakeCertGenerator {
    fn generate(
        &self,
        _dns_names: &[String],
        validity: Duration,
        now: DateTime<Utc>,
    ) -> Result<ServingCertBundle, CertError> {
        let serial = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ServingCertBundle {
            ca_pem: fake_pem("CA CERTIFICATE", serial),
            cert_pem: fake_pem("CERTIFICATE", serial),
            key_pem: fake_pem("PRIVATE KEY", serial),
            validity: CertValidity::new(now, now + validity),
        })
    }
}

pub fn spec(deadline: i64) -> RunOnceDurationOverrideSpec {
    let mut spec = RunOnceDurationOverrideSpec::default();
    spec.run_once_duration_override.spec = RunOnceDurationOverrideConfigSpec::new(deadline);
    spec
}

/// A `RunOnceDurationOverride` as the API server would return it
pub fn override_named(name: &str, deadline: i64) -> RunOnceDurationOverride {
    let mut obj = RunOnceDurationOverride::new(name, spec(deadline));
    obj.metadata.uid = Some(format!("{name}-uid"));
    obj.metadata.generation = Some(1);
    obj
}

pub fn singleton(deadline: i64) -> RunOnceDurationOverride {
    override_named("cluster", deadline)
}

/// Reconciler over an in-memory store with default settings
pub fn reconciler(store: Arc<MemoryStore>) -> (Arc<Reconciler>, Arc<FakeCertGenerator>) {
    reconciler_with(store, OperatorConfig::default())
}

pub fn reconciler_with(
    store: Arc<MemoryStore>,
    config: OperatorConfig,
) -> (Arc<Reconciler>, Arc<FakeCertGenerator>) {
    let certs = Arc::new(FakeCertGenerator::default());
    let reconciler = Reconciler::with_store(
        store,
        Arc::clone(&certs) as Arc<dyn CertGenerator>,
        Arc::new(RwLock::new(config)),
    );
    (Arc::new(reconciler), certs)
}
