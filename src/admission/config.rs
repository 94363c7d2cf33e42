//! # Admission Configuration
//!
//! The YAML document the operator writes into the configuration ConfigMap and
//! the webhook reads back, plus the hot-swappable copy the webhook serves from.
//!
//! ```yaml
//! apiVersion: admission.runoncedurationoverride.openshift.io/v1
//! kind: RunOnceDurationOverrideConfig
//! spec:
//!   activeDeadlineSeconds: 3600
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::ConfigError;
use crate::constants::{ADMISSION_GROUP, ADMISSION_VERSION, CONFIGURATION_KIND};
use crate::crd::RunOnceDurationOverrideConfigSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigurationDocument {
    api_version: String,
    kind: String,
    #[serde(default)]
    spec: RunOnceDurationOverrideConfigSpec,
}

fn expected_api_version() -> String {
    format!("{ADMISSION_GROUP}/{ADMISSION_VERSION}")
}

/// Render the configuration document for the given settings
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDocument`] if YAML serialization fails.
pub fn render_configuration(spec: &RunOnceDurationOverrideConfigSpec) -> Result<String, ConfigError> {
    let document = ConfigurationDocument {
        api_version: expected_api_version(),
        kind: CONFIGURATION_KIND.to_string(),
        spec: spec.clone(),
    };
    serde_yaml::to_string(&document).map_err(|e| ConfigError::InvalidDocument(e.to_string()))
}

/// Parse a configuration document
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDocument`] for malformed YAML or a document of
/// the wrong kind or version.
pub fn parse_configuration(text: &str) -> Result<RunOnceDurationOverrideConfigSpec, ConfigError> {
    let document: ConfigurationDocument =
        serde_yaml::from_str(text).map_err(|e| ConfigError::InvalidDocument(e.to_string()))?;

    if document.kind != CONFIGURATION_KIND {
        return Err(ConfigError::InvalidDocument(format!(
            "expected kind {CONFIGURATION_KIND}, got {}",
            document.kind
        )));
    }
    if document.api_version != expected_api_version() {
        return Err(ConfigError::InvalidDocument(format!(
            "expected apiVersion {}, got {}",
            expected_api_version(),
            document.api_version
        )));
    }
    Ok(document.spec)
}

/// Configuration currently served by the webhook
///
/// Readers take a cheap snapshot; a reload swaps the whole value.
#[derive(Debug, Clone, Default)]
pub struct ActiveConfig {
    inner: Arc<RwLock<Option<Arc<RunOnceDurationOverrideConfigSpec>>>>,
}

impl ActiveConfig {
    #[must_use]
    pub fn new(initial: Option<RunOnceDurationOverrideConfigSpec>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial.map(Arc::new))),
        }
    }

    pub async fn snapshot(&self) -> Option<Arc<RunOnceDurationOverrideConfigSpec>> {
        self.inner.read().await.clone()
    }

    /// Swap in a new configuration, returning whether it differed
    pub async fn replace(&self, spec: RunOnceDurationOverrideConfigSpec) -> bool {
        let mut guard = self.inner.write().await;
        let changed = guard.as_deref() != Some(&spec);
        if changed {
            *guard = Some(Arc::new(spec));
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_then_parse() {
        let spec = RunOnceDurationOverrideConfigSpec::new(3600);
        let text = render_configuration(&spec).unwrap();
        assert!(text.contains("kind: RunOnceDurationOverrideConfig"));
        assert!(text.contains("activeDeadlineSeconds: 3600"));
        assert_eq!(parse_configuration(&text).unwrap(), spec);
    }

    #[test]
    fn test_parse_rejects_wrong_kind() {
        let text = "apiVersion: admission.runoncedurationoverride.openshift.io/v1\nkind: Something\nspec:\n  activeDeadlineSeconds: 5\n";
        assert!(matches!(
            parse_configuration(text),
            Err(ConfigError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_configuration("{{ not yaml").is_err());
    }

    #[test]
    fn test_missing_spec_defaults_to_disabled() {
        let text = "apiVersion: admission.runoncedurationoverride.openshift.io/v1\nkind: RunOnceDurationOverrideConfig\n";
        assert!(!parse_configuration(text).unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_active_config_replace() {
        let active = ActiveConfig::new(None);
        assert!(active.snapshot().await.is_none());
        assert!(active.replace(RunOnceDurationOverrideConfigSpec::new(10)).await);
        assert!(!active.replace(RunOnceDurationOverrideConfigSpec::new(10)).await);
        assert_eq!(
            active.snapshot().await.unwrap().active_deadline_seconds,
            10
        );
    }
}
