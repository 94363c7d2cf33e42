//! # Mutator
//!
//! Decides whether an admitted pod gets the configured `activeDeadlineSeconds`.
//!
//! Only run-once pods (`restartPolicy` of `Never` or `OnFailure`) are touched,
//! and an explicit value on the pod always wins. Applying the mutation to an
//! already-mutated pod is a no-op because the field is then set.

use json_patch::{AddOperation, Patch, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::Pod;

use crate::crd::RunOnceDurationOverrideConfigSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

impl RestartPolicy {
    /// Absent or unrecognized values count as `Always`, the API default
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("Never") => RestartPolicy::Never,
            Some("OnFailure") => RestartPolicy::OnFailure,
            _ => RestartPolicy::Always,
        }
    }

    /// Pods that terminate instead of restarting forever
    #[must_use]
    pub fn is_run_once(&self) -> bool {
        matches!(self, RestartPolicy::Never | RestartPolicy::OnFailure)
    }
}

/// Why a pod was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotRunOnce,
    AlreadySet,
    Disabled,
    NoPodSpec,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotRunOnce => "not-run-once",
            SkipReason::AlreadySet => "already-set",
            SkipReason::Disabled => "disabled",
            SkipReason::NoPodSpec => "no-pod-spec",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Unchanged(SkipReason),
    SetActiveDeadline(i64),
}

/// Pure decision for a pod's restart policy and current deadline
#[must_use]
pub fn resolve_active_deadline(
    policy: RestartPolicy,
    current: Option<i64>,
    config: &RunOnceDurationOverrideConfigSpec,
) -> Mutation {
    if !policy.is_run_once() {
        return Mutation::Unchanged(SkipReason::NotRunOnce);
    }
    if current.is_some() {
        return Mutation::Unchanged(SkipReason::AlreadySet);
    }
    if !config.is_enabled() {
        return Mutation::Unchanged(SkipReason::Disabled);
    }
    Mutation::SetActiveDeadline(config.active_deadline_seconds)
}

/// Decide the mutation for a pod
#[must_use]
pub fn evaluate(pod: &Pod, config: &RunOnceDurationOverrideConfigSpec) -> Mutation {
    let Some(spec) = pod.spec.as_ref() else {
        return Mutation::Unchanged(SkipReason::NoPodSpec);
    };
    resolve_active_deadline(
        RestartPolicy::parse(spec.restart_policy.as_deref()),
        spec.active_deadline_seconds,
        config,
    )
}

/// JSON patch implementing a mutation, `None` when nothing changes
#[must_use]
pub fn patch_for(mutation: Mutation) -> Option<Patch> {
    match mutation {
        Mutation::Unchanged(_) => None,
        Mutation::SetActiveDeadline(seconds) => {
            Some(Patch(vec![PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens(["spec", "activeDeadlineSeconds"]),
                value: serde_json::Value::from(seconds),
            })]))
        }
    }
}

/// Apply the mutation to a pod in place, returning whether it changed
pub fn mutate(pod: &mut Pod, config: &RunOnceDurationOverrideConfigSpec) -> bool {
    match evaluate(pod, config) {
        Mutation::SetActiveDeadline(seconds) => {
            if let Some(spec) = pod.spec.as_mut() {
                spec.active_deadline_seconds = Some(seconds);
            }
            true
        }
        Mutation::Unchanged(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodSpec;

    fn pod(restart_policy: Option<&str>, deadline: Option<i64>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                restart_policy: restart_policy.map(str::to_string),
                active_deadline_seconds: deadline,
                ..PodSpec::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn test_restart_policy_parse() {
        assert_eq!(RestartPolicy::parse(Some("Never")), RestartPolicy::Never);
        assert_eq!(RestartPolicy::parse(Some("OnFailure")), RestartPolicy::OnFailure);
        assert_eq!(RestartPolicy::parse(Some("Always")), RestartPolicy::Always);
        assert_eq!(RestartPolicy::parse(None), RestartPolicy::Always);
        assert_eq!(RestartPolicy::parse(Some("never")), RestartPolicy::Always);
    }

    #[test]
    fn test_decision_table() {
        let enabled = RunOnceDurationOverrideConfigSpec::new(100);
        let disabled = RunOnceDurationOverrideConfigSpec::new(0);
        let negative = RunOnceDurationOverrideConfigSpec::new(-5);

        let cases = [
            (RestartPolicy::Always, None, &enabled, Mutation::Unchanged(SkipReason::NotRunOnce)),
            (RestartPolicy::Always, Some(5), &enabled, Mutation::Unchanged(SkipReason::NotRunOnce)),
            (RestartPolicy::Never, None, &enabled, Mutation::SetActiveDeadline(100)),
            (RestartPolicy::OnFailure, None, &enabled, Mutation::SetActiveDeadline(100)),
            (RestartPolicy::Never, Some(50), &enabled, Mutation::Unchanged(SkipReason::AlreadySet)),
            (RestartPolicy::Never, Some(50), &disabled, Mutation::Unchanged(SkipReason::AlreadySet)),
            (RestartPolicy::Never, None, &disabled, Mutation::Unchanged(SkipReason::Disabled)),
            (RestartPolicy::OnFailure, None, &negative, Mutation::Unchanged(SkipReason::Disabled)),
        ];
        for (policy, current, config, expected) in cases {
            assert_eq!(
                resolve_active_deadline(policy, current, config),
                expected,
                "{policy:?} with {current:?} and {config:?}"
            );
        }
    }

    #[test]
    fn test_mutate_is_idempotent() {
        let config = RunOnceDurationOverrideConfigSpec::new(100);
        let mut once = pod(Some("Never"), None);
        assert!(mutate(&mut once, &config));
        let mut twice = once.clone();
        assert!(!mutate(&mut twice, &config));
        assert_eq!(once, twice);
        assert_eq!(once.spec.unwrap().active_deadline_seconds, Some(100));
    }

    #[test]
    fn test_pod_without_spec_is_left_alone() {
        let config = RunOnceDurationOverrideConfigSpec::new(100);
        assert_eq!(
            evaluate(&Pod::default(), &config),
            Mutation::Unchanged(SkipReason::NoPodSpec)
        );
    }

    #[test]
    fn test_patch_applies_to_pod_json() {
        let config = RunOnceDurationOverrideConfigSpec::new(100);
        let target = pod(Some("OnFailure"), None);
        let patch = patch_for(evaluate(&target, &config)).unwrap();

        let mut doc = serde_json::to_value(&target).unwrap();
        json_patch::patch(&mut doc, &patch.0).unwrap();
        assert_eq!(doc["spec"]["activeDeadlineSeconds"], 100);
        assert!(patch_for(Mutation::Unchanged(SkipReason::Disabled)).is_none());
    }
}
