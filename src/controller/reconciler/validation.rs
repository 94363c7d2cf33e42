//! # Validation
//!
//! Checks run before any child is touched.

use kube::ResourceExt;

use crate::config::OperatorConfig;
use crate::controller::conditions::Reason;
use crate::controller::reconciler::types::ReconcilerError;
use crate::crd::RunOnceDurationOverride;

/// Validate the resource and the operator settings for a pass
///
/// # Errors
///
/// Returns [`ReconcilerError::Validation`] with `InvalidParameters` when the
/// resource is not the singleton, and `ConfigurationCheckFailed` when the
/// operator settings are out of range.
pub fn validate(
    resource: &RunOnceDurationOverride,
    config: &OperatorConfig,
) -> Result<(), ReconcilerError> {
    let name = resource.name_any();
    if name != config.singleton_name {
        return Err(ReconcilerError::Validation {
            reason: Reason::InvalidParameters,
            message: format!(
                "only the RunOnceDurationOverride named '{}' is honored, found '{}'",
                config.singleton_name, name
            ),
        });
    }

    config
        .validate()
        .map_err(|e| ReconcilerError::Validation {
            reason: Reason::ConfigurationCheckFailed,
            message: e.to_string(),
        })
}
