//! # Error Policy
//!
//! Requeue policy for failed passes and classification of watch stream errors.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::RunOnceDurationOverride;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::{self, Action};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback delay when the backoff table cannot be consulted
const DEFAULT_ERROR_REQUEUE_SECS: u64 = 60;

/// Requeue a failed pass with per-resource Fibonacci backoff
///
/// The pass itself has already counted the failure; this only draws the next
/// delay from the resource's backoff sequence.
pub fn handle_reconciliation_error(
    obj: Arc<RunOnceDurationOverride>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "operator.watch.reconciliation_error",
        resource.name = name.as_str(),
        reason = error.reason().as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {:?}", name, error);

    let (backoff_seconds, error_count) = next_backoff(&ctx, &name);
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, trigger source: error-backoff)",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

fn next_backoff(ctx: &Reconciler, name: &str) -> (u64, u32) {
    match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(name.to_string()).or_insert_with(|| {
                // Only reached if the pass failed before recording its failure
                let mut state = BackoffState::new(
                    crate::constants::DEFAULT_BACKOFF_MIN_SECS,
                    crate::constants::DEFAULT_BACKOFF_MAX_SECS,
                );
                state.increment_error();
                state
            });
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!(
                "Failed to lock backoff_states: {}, using default backoff",
                e
            );
            (DEFAULT_ERROR_REQUEUE_SECS, 0)
        }
    }
}

/// Whether a controller stream error says something about the stream itself
///
/// Failed passes already carry a requeue from [`handle_reconciliation_error`]
/// and must not stall the stream.
#[must_use]
pub fn is_stream_failure<QE>(error: &controller::Error<ReconcilerError, QE>) -> bool {
    !matches!(
        error,
        controller::Error::ReconcilerFailed(..) | controller::Error::ObjectNotFound(..)
    )
}

/// Broad class of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

/// Classify a watch error from its debug rendering
///
/// 404 is checked before 401 because a plain-text 404 body surfaces as a
/// deserialization error that also mentions the failed watch.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        return WatchErrorKind::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorKind::Throttled;
    }
    if is_not_found {
        return WatchErrorKind::NotFound;
    }
    WatchErrorKind::Other
}

/// Handle a watch stream error
///
/// Returns `None` to filter the error out and let the watch restart, or
/// `Some(())` to keep the event flowing.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "operator.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
            error!("   Verify the operator ClusterRole and ClusterRoleBinding still exist and bind its ServiceAccount:");
            error!("      kubectl auth can-i watch runoncedurationoverrides.operator.openshift.io --as=system:serviceaccount:<namespace>:<serviceaccount>");
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!("Watch resource version expired (410), watch will restart");
            None
        }
        WatchErrorKind::Throttled => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            backoff.store(
                current_backoff.saturating_mul(2).min(max_backoff_ms),
                Ordering::Relaxed,
            );
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404) - normal if a child was deleted or the CRD is missing. Error: {}",
                error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}
