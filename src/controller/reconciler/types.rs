//! # Types
//!
//! Core types for the reconciler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use kube::Client;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::SharedOperatorConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::cert::{CertGenerator, RcgenCertGenerator};
use crate::controller::conditions::Reason;
use crate::controller::sync::{ChildKind, KubeStore, ResourceStore, SyncError, TemplateError};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The resource or operator settings are invalid; retrying will not help
    #[error("{reason}: {message}")]
    Validation { reason: Reason, message: String },
    /// The operand could not be provisioned
    #[error("{reason}: {message}")]
    Provisioning { reason: Reason, message: String },
    /// Serving certificate material could not be produced or published
    #[error("{reason}: {message}")]
    Certificate { reason: Reason, message: String },
    /// Store or network failures expected to clear on retry
    #[error("{reason}: {message}")]
    Transient { reason: Reason, message: String },
}

impl ReconcilerError {
    #[must_use]
    pub fn reason(&self) -> Reason {
        match self {
            ReconcilerError::Validation { reason, .. }
            | ReconcilerError::Provisioning { reason, .. }
            | ReconcilerError::Certificate { reason, .. }
            | ReconcilerError::Transient { reason, .. } => *reason,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            ReconcilerError::Validation { message, .. }
            | ReconcilerError::Provisioning { message, .. }
            | ReconcilerError::Certificate { message, .. }
            | ReconcilerError::Transient { message, .. } => message,
        }
    }

    /// Whether a requeue can fix this without a change to the resource
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcilerError::Validation { .. })
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ReconcilerError::Transient {
            reason: Reason::InternalError,
            message: message.into(),
        }
    }
}

impl From<SyncError> for ReconcilerError {
    fn from(err: SyncError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        match (kind, &err) {
            (ChildKind::Deployment, _) => ReconcilerError::Provisioning {
                reason: Reason::DeploymentNotReady,
                message,
            },
            (ChildKind::ServingCertSecret | ChildKind::ServiceCaBundle, _) => {
                ReconcilerError::Certificate {
                    reason: Reason::CertNotAvailable,
                    message,
                }
            }
            (_, SyncError::NotReady { .. }) => ReconcilerError::Transient {
                reason: kind.not_ready_reason(),
                message,
            },
            (ChildKind::ApiService | ChildKind::MutatingWebhook | ChildKind::Service, _) => {
                ReconcilerError::Transient {
                    reason: Reason::AdmissionWebhookNotAvailable,
                    message,
                }
            }
            (ChildKind::Configuration, _) => ReconcilerError::internal(message),
        }
    }
}

impl From<TemplateError> for ReconcilerError {
    fn from(err: TemplateError) -> Self {
        ReconcilerError::internal(format!("failed to build desired objects: {err}"))
    }
}

/// Backoff state for a specific resource
/// Tracks consecutive failed passes and the backoff calculator for retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ResourceStore>,
    pub cert_generator: Arc<dyn CertGenerator>,
    pub config: SharedOperatorConfig,
    // Keyed by resource name
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    // One pass per resource at a time
    pub reconcile_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store)
            .field("cert_generator", &self.cert_generator)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Reconciler talking to the cluster through `client`
    #[must_use]
    pub fn new(client: Client, config: SharedOperatorConfig) -> Self {
        Self::with_store(
            Arc::new(KubeStore::new(client)),
            Arc::new(RcgenCertGenerator),
            config,
        )
    }

    #[must_use]
    pub fn with_store(
        store: Arc<dyn ResourceStore>,
        cert_generator: Arc<dyn CertGenerator>,
        config: SharedOperatorConfig,
    ) -> Self {
        Self {
            store,
            cert_generator,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            reconcile_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get or create the pass lock for a resource
    #[must_use]
    pub fn reconcile_lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = lock_recovering(&self.reconcile_locks);
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Record a failed or incomplete pass, returning the consecutive failure count
    pub fn record_failure(&self, name: &str, min_secs: u64, max_secs: u64) -> u32 {
        let mut states = lock_recovering(&self.backoff_states);
        let state = states
            .entry(name.to_string())
            .or_insert_with(|| BackoffState::new(min_secs, max_secs));
        state.increment_error();
        state.error_count
    }

    /// Record a fully successful pass
    pub fn record_success(&self, name: &str) {
        let mut states = lock_recovering(&self.backoff_states);
        if let Some(state) = states.get_mut(name) {
            state.reset();
        }
    }

    /// Consecutive failed passes for a resource
    #[must_use]
    pub fn failure_count(&self, name: &str) -> u32 {
        lock_recovering(&self.backoff_states)
            .get(name)
            .map_or(0, |s| s.error_count)
    }
}

/// A poisoned map only means another pass panicked mid-update; the data is
/// still usable.
pub(crate) fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
