//! # Status
//!
//! Folding a pass result into the resource status.

use chrono::{DateTime, Utc};

use crate::controller::conditions::{ConditionSet, ConditionStatus, ConditionType, Reason};
use crate::controller::reconciler::types::ReconcilerError;
use crate::controller::sync::ChildKind;
use crate::crd::{OverrideResources, ResourceReference};

/// How a pass ended, as far as conditions are concerned
#[derive(Debug)]
pub enum PassResult<'a> {
    /// Every child exists and is ready
    Ready,
    /// A child exists but is still converging
    Pending { kind: ChildKind, message: &'a str },
    Failed(&'a ReconcilerError),
}

/// Store the reference for a child in its status slot
pub fn record_reference(
    resources: &mut OverrideResources,
    kind: ChildKind,
    reference: ResourceReference,
) {
    let slot = match kind {
        ChildKind::Configuration => &mut resources.configuration_ref,
        ChildKind::ServiceCaBundle => &mut resources.service_ca_config_map_ref,
        ChildKind::Service => &mut resources.service_ref,
        ChildKind::ServingCertSecret => &mut resources.service_cert_secret_ref,
        ChildKind::Deployment => &mut resources.deployment_ref,
        ChildKind::ApiService => &mut resources.api_service_ref,
        ChildKind::MutatingWebhook => &mut resources.mutating_webhook_configuration_ref,
    };
    *slot = Some(reference);
}

/// Update `InstallReadinessFailure` and `Available` for a pass result
///
/// `Available` stays True through up to `threshold - 1` consecutive
/// unsuccessful passes; `failure_streak` includes the current pass. A
/// validation failure flips it immediately.
pub fn apply_conditions(
    conditions: &mut ConditionSet,
    result: &PassResult<'_>,
    failure_streak: u32,
    threshold: u32,
    now: DateTime<Utc>,
) {
    let holding = conditions.is_true(ConditionType::Available) && failure_streak < threshold;

    match result {
        PassResult::Ready => {
            conditions.remove(ConditionType::InstallReadinessFailure);
            conditions.set(
                ConditionType::Available,
                ConditionStatus::True,
                None,
                Some("run-once duration override webhook is available".to_string()),
                now,
            );
        }
        PassResult::Pending { kind, message } => {
            conditions.remove(ConditionType::InstallReadinessFailure);
            if !holding {
                set_unavailable(conditions, kind.not_ready_reason(), message, now);
            }
        }
        PassResult::Failed(err) => {
            conditions.set(
                ConditionType::InstallReadinessFailure,
                ConditionStatus::True,
                Some(err.reason()),
                Some(err.message().to_string()),
                now,
            );
            if !holding || !err.is_retryable() {
                set_unavailable(conditions, err.reason(), err.message(), now);
            }
        }
    }
}

fn set_unavailable(conditions: &mut ConditionSet, reason: Reason, message: &str, now: DateTime<Utc>) {
    conditions.set(
        ConditionType::Available,
        ConditionStatus::False,
        Some(reason),
        Some(message.to_string()),
        now,
    );
}
