//! # Reconcile
//!
//! One pass drives the webhook installation toward the state described by the
//! singleton `RunOnceDurationOverride`.
//!
//! ## Pass
//!
//! 1. Validate the resource name and the operator settings
//! 2. Hash the admission configuration
//! 3. Load the serving certificate and rotate it when due
//! 4. After a rotation, push the new CA bundle to every existing trust holder
//!    before anything serves the new certificate
//! 5. Ensure the children: strictly in creation order while any is missing,
//!    all at once when every child already exists
//! 6. Fold the result into conditions and write status once, only if it changed
//!
//! The owner is re-read between creation stages; when it has been deleted the
//! pass stops without writing anything further.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::OperatorConfig;
use crate::controller::cert::ServingCertMaterial;
use crate::controller::conditions::{ConditionSet, Reason};
use crate::controller::hash::hash_object;
use crate::controller::reconciler::status::{apply_conditions, record_reference, PassResult};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::reconciler::validation::validate;
use crate::controller::rotation::RotationScheduler;
use crate::controller::sync::{
    ChildKind, ChildTemplates, DesiredResource, EnsureOutcome, SyncError, Synchronizer,
};
use crate::crd::{RunOnceDurationOverride, RunOnceDurationOverrideStatus};
use crate::constants::SERVING_CERT_SECRET_NAME;
use crate::observability::metrics;

/// Creation stages; children within a stage are independent of each other
const STAGES: [&[ChildKind]; 6] = [
    &[ChildKind::Configuration],
    &[ChildKind::ServiceCaBundle],
    &[ChildKind::Service],
    &[ChildKind::ServingCertSecret],
    &[ChildKind::Deployment],
    &[ChildKind::ApiService, ChildKind::MutatingWebhook],
];

/// Children that publish the CA bundle to the API server
const TRUST_HOLDERS: [ChildKind; 3] = [
    ChildKind::ServiceCaBundle,
    ChildKind::ApiService,
    ChildKind::MutatingWebhook,
];

/// How the child phase of a pass ended
#[derive(Debug)]
enum PassOutcome {
    Ready { rotate_at: Option<DateTime<Utc>> },
    Pending { kind: ChildKind, message: String },
    /// The owner was deleted while the pass was running
    OwnerGone,
}

/// Controller entry point
///
/// # Errors
///
/// Returns the pass error for retryable failures so the error policy can
/// apply backoff. Validation failures are reported in status only.
pub async fn reconcile(
    obj: Arc<RunOnceDurationOverride>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    reconcile_at(&obj, &ctx, Utc::now()).await
}

/// Run a pass as of `now`
///
/// # Errors
///
/// See [`reconcile`].
pub async fn reconcile_at(
    obj: &RunOnceDurationOverride,
    ctx: &Reconciler,
    now: DateTime<Utc>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let span = info_span!(
        "reconcile",
        resource.name = %name,
        resource.generation = obj.metadata.generation.unwrap_or(0),
    );
    async move {
        let lock = ctx.reconcile_lock(&name);
        let _guard = lock.lock().await;
        let config = ctx.config.read().await.clone();

        let started = Instant::now();
        metrics::increment_reconciliations();
        let result = run(obj, ctx, &config, &name, now).await;
        metrics::observe_reconciliation_duration(started.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::increment_reconciliation_errors();
        }
        result
    }
    .instrument(span)
    .await
}

async fn run(
    obj: &RunOnceDurationOverride,
    ctx: &Reconciler,
    config: &OperatorConfig,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Action, ReconcilerError> {
    let mut status = obj.status.clone().unwrap_or_default();
    let mut conditions = ConditionSet::from_conditions(&status.conditions);
    status.version = Some(config.operand_version.clone());
    status.image = Some(config.operand_image.clone());
    status.observed_generation = obj.metadata.generation;

    if let Err(err) = validate(obj, config) {
        warn!(reason = %err.reason(), "{}", err.message());
        let streak = ctx.record_failure(name, config.backoff_min_secs, config.backoff_max_secs);
        apply_conditions(
            &mut conditions,
            &PassResult::Failed(&err),
            streak,
            config.available_failure_threshold,
            now,
        );
        status.conditions = conditions.into_vec();
        write_status(obj, ctx, status).await?;
        return Ok(Action::await_change());
    }

    let outcome = ensure_children(obj, ctx, config, &mut status, now).await;

    let (result, action) = match &outcome {
        Ok(PassOutcome::OwnerGone) => {
            info!("resource deleted during the pass, abandoning it");
            return Ok(Action::await_change());
        }
        Ok(PassOutcome::Ready { rotate_at }) => {
            ctx.record_success(name);
            let mut requeue = config.resync_interval();
            if let Some(until_rotation) = rotate_at.and_then(|at| (at - now).to_std().ok()) {
                requeue = requeue.min(until_rotation);
            }
            debug!(requeue_secs = requeue.as_secs(), "all children ready");
            (PassResult::Ready, Action::requeue(requeue))
        }
        Ok(PassOutcome::Pending { kind, message }) => {
            info!(child.kind = kind.as_str(), "waiting for child: {}", message);
            (
                PassResult::Pending {
                    kind: *kind,
                    message: message.as_str(),
                },
                Action::requeue(config.not_ready_requeue()),
            )
        }
        Err(err) => (PassResult::Failed(err), Action::await_change()),
    };

    let streak = match &result {
        PassResult::Ready => 0,
        _ => ctx.record_failure(name, config.backoff_min_secs, config.backoff_max_secs),
    };
    apply_conditions(
        &mut conditions,
        &result,
        streak,
        config.available_failure_threshold,
        now,
    );
    status.conditions = conditions.into_vec();

    if !owner_alive(ctx, obj).await? {
        info!("resource deleted during the pass, skipping status update");
        return Ok(Action::await_change());
    }
    write_status(obj, ctx, status).await?;

    match outcome {
        Ok(_) => Ok(action),
        Err(err) if !err.is_retryable() => Ok(Action::await_change()),
        Err(err) => Err(err),
    }
}

async fn ensure_children(
    obj: &RunOnceDurationOverride,
    ctx: &Reconciler,
    config: &OperatorConfig,
    status: &mut RunOnceDurationOverrideStatus,
    now: DateTime<Utc>,
) -> Result<PassOutcome, ReconcilerError> {
    let owner = obj
        .controller_owner_ref(&())
        .ok_or_else(|| ReconcilerError::Provisioning {
            reason: Reason::CannotSetReference,
            message: "resource has no uid to reference from its children".to_string(),
        })?;
    let sync = Synchronizer::new(ctx.store.clone(), config.operation_timeout());
    let namespace = config.operand_namespace.as_str();

    let override_config = obj.spec.config().clone();
    let configuration_hash = hash_object(&override_config)
        .map_err(|e| ReconcilerError::internal(format!("failed to hash configuration: {e}")))?;
    status.hash.configuration = Some(configuration_hash.clone());

    let (material, rotated) = current_material(ctx, &sync, config, namespace, now).await?;
    let serving_cert_hash = material.hash();
    status.hash.serving_cert = Some(serving_cert_hash.clone());
    let rotate_at = RotationScheduler::new(Some(material.validity), config.cert_refresh_fraction)
        .next_rotation_at();
    status.certs_rotate_at = rotate_at.map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true));

    let templates = ChildTemplates {
        config,
        owner,
        override_config: &override_config,
        configuration_hash: &configuration_hash,
        material: &material,
        serving_cert_hash: &serving_cert_hash,
    };
    let desired = templates.build_all()?;

    let existing = join_all(desired.iter().map(|d| {
        sync.fetch(d.kind, d.namespace.as_deref(), &d.name)
    }))
    .await;
    let mut present = Vec::with_capacity(desired.len());
    for (d, found) in desired.iter().zip(existing) {
        if found?.is_some() {
            present.push(d.kind);
        }
    }
    let all_exist = present.len() == desired.len();

    if rotated {
        // A holder that fails here aborts the pass before the new
        // certificate reaches the Secret.
        let holders: Vec<&DesiredResource> = desired
            .iter()
            .filter(|d| TRUST_HOLDERS.contains(&d.kind) && present.contains(&d.kind))
            .collect();
        debug!(holders = holders.len(), "publishing rotated CA bundle first");
        let outcomes = join_all(holders.into_iter().map(|d| sync.ensure(d))).await;
        // Readiness is reported again by the full ensure below.
        settle(status, outcomes)?;
    }

    if all_exist {
        let outcomes = join_all(desired.iter().map(|d| sync.ensure(d))).await;
        if let Some(pending) = settle(status, outcomes)? {
            return Ok(pending);
        }
    } else {
        debug!("children missing, creating in order");
        for (index, stage) in STAGES.iter().enumerate() {
            if index > 0 && !owner_alive(ctx, obj).await? {
                return Ok(PassOutcome::OwnerGone);
            }
            let members: Vec<&DesiredResource> =
                desired.iter().filter(|d| stage.contains(&d.kind)).collect();
            let outcomes = join_all(members.into_iter().map(|d| sync.ensure(d))).await;
            if let Some(pending) = settle(status, outcomes)? {
                return Ok(pending);
            }
        }
    }

    if !owner_alive(ctx, obj).await? {
        return Ok(PassOutcome::OwnerGone);
    }
    Ok(PassOutcome::Ready { rotate_at })
}

/// Record references from a batch of outcomes
///
/// Returns the first error, or the first child that is not ready yet.
fn settle(
    status: &mut RunOnceDurationOverrideStatus,
    outcomes: Vec<Result<EnsureOutcome, SyncError>>,
) -> Result<Option<PassOutcome>, ReconcilerError> {
    let mut first_error = None;
    let mut first_pending = None;
    for outcome in outcomes {
        match outcome {
            Ok(outcome) => {
                if !outcome.ready && first_pending.is_none() {
                    first_pending = Some(PassOutcome::Pending {
                        kind: outcome.kind,
                        message: outcome.detail.clone().unwrap_or_default(),
                    });
                }
                record_reference(&mut status.resources, outcome.kind, outcome.reference);
            }
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err.into()),
        None => Ok(first_pending),
    }
}

/// The serving material to publish, and whether it was rotated in this pass
async fn current_material(
    ctx: &Reconciler,
    sync: &Synchronizer,
    config: &OperatorConfig,
    namespace: &str,
    now: DateTime<Utc>,
) -> Result<(ServingCertMaterial, bool), ReconcilerError> {
    let secret = sync
        .fetch(ChildKind::ServingCertSecret, Some(namespace), SERVING_CERT_SECRET_NAME)
        .await?;
    let existing = secret.as_ref().and_then(ServingCertMaterial::from_secret);
    let scheduler = RotationScheduler::new(
        existing.as_ref().map(|m| m.validity),
        config.cert_refresh_fraction,
    );

    match existing {
        Some(material) if !scheduler.should_rotate(now) => {
            Ok((material.retire_expired_ca(now), false))
        }
        outgoing => {
            let bundle = ctx
                .cert_generator
                .generate(&config.service_dns_names(), config.cert_validity(), now)
                .map_err(|e| ReconcilerError::Provisioning {
                    reason: Reason::CannotGenerateCert,
                    message: e.to_string(),
                })?;
            info!(
                not_after = %bundle.validity.not_after,
                first_issue = outgoing.is_none(),
                "🔐 Issued new serving certificate"
            );
            metrics::increment_cert_rotations();
            Ok((ServingCertMaterial::rotated(bundle, outgoing.as_ref(), now), true))
        }
    }
}

/// Whether the resource this pass started from still exists
async fn owner_alive(
    ctx: &Reconciler,
    obj: &RunOnceDurationOverride,
) -> Result<bool, ReconcilerError> {
    let current = ctx
        .store
        .get_owner(&obj.name_any())
        .await
        .map_err(|e| ReconcilerError::internal(format!("failed to read resource: {e}")))?;
    Ok(match current {
        Some(current) => current.metadata.uid == obj.meta().uid,
        None => false,
    })
}

/// Write status when it differs from what the pass started with
async fn write_status(
    obj: &RunOnceDurationOverride,
    ctx: &Reconciler,
    status: RunOnceDurationOverrideStatus,
) -> Result<(), ReconcilerError> {
    if obj.status.as_ref() == Some(&status) {
        debug!("status unchanged, skipping write");
        return Ok(());
    }
    ctx.store
        .patch_owner_status(&obj.name_any(), &status)
        .await
        .map_err(|e| ReconcilerError::internal(format!("failed to update status: {e}")))?;
    metrics::increment_status_writes();
    Ok(())
}
