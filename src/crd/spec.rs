//! # Spec
//!
//! Desired state of the override: the deadline applied to run-once pods.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::RunOnceDurationOverrideStatus;

/// RunOnceDurationOverride Custom Resource Definition
///
/// Cluster-scoped singleton. The operator only acts on the instance whose
/// name matches the configured singleton name (`cluster` by default).
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "RunOnceDurationOverride",
    status = "RunOnceDurationOverrideStatus",
    shortname = "rodoo",
    printcolumn = r#"{"name":"Available", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name":"Deadline", "type":"integer", "jsonPath":".spec.runOnceDurationOverride.spec.activeDeadlineSeconds"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RunOnceDurationOverrideSpec {
    /// Admission configuration handed to the webhook
    #[serde(default)]
    pub run_once_duration_override: RunOnceDurationOverrideConfig,
}

/// Wrapper matching the layout of the admission configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunOnceDurationOverrideConfig {
    #[serde(default)]
    pub spec: RunOnceDurationOverrideConfigSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunOnceDurationOverrideConfigSpec {
    /// Value written to `spec.activeDeadlineSeconds` of admitted run-once pods.
    /// Zero or negative disables mutation.
    #[serde(default)]
    pub active_deadline_seconds: i64,
}

impl RunOnceDurationOverrideConfigSpec {
    #[must_use]
    pub fn new(active_deadline_seconds: i64) -> Self {
        Self {
            active_deadline_seconds,
        }
    }

    /// Whether the configured deadline should be applied at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.active_deadline_seconds > 0
    }
}

impl RunOnceDurationOverrideSpec {
    /// Shortcut to the admission configuration
    #[must_use]
    pub fn config(&self) -> &RunOnceDurationOverrideConfigSpec {
        &self.run_once_duration_override.spec
    }
}
