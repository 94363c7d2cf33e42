//! # Operator Configuration
//!
//! Operator-level settings loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

use super::{env_lookup, var_or_default, var_or_default_bool, var_or_default_str};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("operand image must not be empty")]
    MissingOperandImage,
    #[error("operand namespace must not be empty")]
    MissingOperandNamespace,
    #[error("certificate refresh fraction must be within (0, 1), got {0}")]
    InvalidRefreshFraction(f64),
    #[error("certificate validity must be at least one day")]
    InvalidCertValidity,
    #[error("operand replicas must be positive, got {0}")]
    InvalidReplicas(i32),
    #[error("invalid configuration document: {0}")]
    InvalidDocument(String),
}

/// Webhook failure policy registered with the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Fail,
    Ignore,
}

impl FailurePolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Fail => "Fail",
            FailurePolicy::Ignore => "Ignore",
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(FailurePolicy::Fail),
            "ignore" => Ok(FailurePolicy::Ignore),
            other => Err(format!("unknown failure policy '{other}'")),
        }
    }
}

/// Operator-level configuration
///
/// All settings have defaults and can be overridden via environment variables
/// set on the operator deployment.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Name of the singleton `RunOnceDurationOverride` (`SINGLETON_NAME`)
    pub singleton_name: String,
    /// Namespace the webhook operand is installed into (`OPERAND_NAMESPACE`)
    pub operand_namespace: String,
    /// Webhook image (`OPERAND_IMAGE`)
    pub operand_image: String,
    /// Version reported in status (`OPERAND_VERSION`)
    pub operand_version: String,
    /// Webhook replicas (`OPERAND_REPLICAS`)
    pub operand_replicas: i32,
    /// Serving certificate validity (`CERT_VALIDITY_DAYS`)
    pub cert_validity_days: u64,
    /// Fraction of the validity window after which the certificate is rotated
    /// (`CERT_REFRESH_FRACTION`)
    pub cert_refresh_fraction: f64,
    /// Consecutive failed passes before `Available` flips to False
    /// (`AVAILABLE_FAILURE_THRESHOLD`)
    pub available_failure_threshold: u32,
    /// Timeout for each individual store call (`OPERATION_TIMEOUT_SECS`)
    pub operation_timeout_secs: u64,
    /// `progressDeadlineSeconds` of the webhook deployment
    /// (`ROLLOUT_PROGRESS_DEADLINE_SECS`)
    pub rollout_progress_deadline_secs: i32,
    /// Requeue interval while children converge (`NOT_READY_REQUEUE_SECS`)
    pub not_ready_requeue_secs: u64,
    /// Periodic resync once available (`RESYNC_INTERVAL_SECS`)
    pub resync_interval_secs: u64,
    /// Fibonacci backoff bounds for failed passes
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    /// Watch stream backoff (milliseconds)
    pub watch_backoff_start_ms: u64,
    pub watch_backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Webhook failure policy (`WEBHOOK_FAILURE_POLICY`)
    pub webhook_failure_policy: FailurePolicy,
    /// Webhook call timeout (`WEBHOOK_TIMEOUT_SECS`)
    pub webhook_timeout_secs: i32,
    /// Enable distributed tracing
    pub enable_tracing: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            singleton_name: DEFAULT_SINGLETON_NAME.to_string(),
            operand_namespace: DEFAULT_OPERAND_NAMESPACE.to_string(),
            operand_image: DEFAULT_OPERAND_IMAGE.to_string(),
            operand_version: DEFAULT_OPERAND_VERSION.to_string(),
            operand_replicas: DEFAULT_OPERAND_REPLICAS,
            cert_validity_days: DEFAULT_CERT_VALIDITY_DAYS,
            cert_refresh_fraction: DEFAULT_CERT_REFRESH_FRACTION,
            available_failure_threshold: DEFAULT_AVAILABLE_FAILURE_THRESHOLD,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            rollout_progress_deadline_secs: DEFAULT_ROLLOUT_PROGRESS_DEADLINE_SECS,
            not_ready_requeue_secs: DEFAULT_NOT_READY_REQUEUE_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_backoff_start_ms: DEFAULT_WATCH_BACKOFF_START_MS,
            watch_backoff_max_ms: DEFAULT_WATCH_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            webhook_failure_policy: FailurePolicy::Fail,
            webhook_timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
            enable_tracing: true,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    /// Load configuration from an arbitrary key lookup
    #[must_use]
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        use crate::constants::*;
        Self {
            singleton_name: var_or_default_str(lookup, "SINGLETON_NAME", DEFAULT_SINGLETON_NAME),
            operand_namespace: var_or_default_str(
                lookup,
                "OPERAND_NAMESPACE",
                DEFAULT_OPERAND_NAMESPACE,
            ),
            operand_image: var_or_default_str(lookup, "OPERAND_IMAGE", DEFAULT_OPERAND_IMAGE),
            operand_version: var_or_default_str(
                lookup,
                "OPERAND_VERSION",
                DEFAULT_OPERAND_VERSION,
            ),
            operand_replicas: var_or_default(lookup, "OPERAND_REPLICAS", DEFAULT_OPERAND_REPLICAS),
            cert_validity_days: var_or_default(
                lookup,
                "CERT_VALIDITY_DAYS",
                DEFAULT_CERT_VALIDITY_DAYS,
            ),
            cert_refresh_fraction: var_or_default(
                lookup,
                "CERT_REFRESH_FRACTION",
                DEFAULT_CERT_REFRESH_FRACTION,
            ),
            available_failure_threshold: var_or_default(
                lookup,
                "AVAILABLE_FAILURE_THRESHOLD",
                DEFAULT_AVAILABLE_FAILURE_THRESHOLD,
            ),
            operation_timeout_secs: var_or_default(
                lookup,
                "OPERATION_TIMEOUT_SECS",
                DEFAULT_OPERATION_TIMEOUT_SECS,
            ),
            rollout_progress_deadline_secs: var_or_default(
                lookup,
                "ROLLOUT_PROGRESS_DEADLINE_SECS",
                DEFAULT_ROLLOUT_PROGRESS_DEADLINE_SECS,
            ),
            not_ready_requeue_secs: var_or_default(
                lookup,
                "NOT_READY_REQUEUE_SECS",
                DEFAULT_NOT_READY_REQUEUE_SECS,
            ),
            resync_interval_secs: var_or_default(
                lookup,
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            backoff_min_secs: var_or_default(lookup, "BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: var_or_default(lookup, "BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_backoff_start_ms: var_or_default(
                lookup,
                "WATCH_BACKOFF_START_MS",
                DEFAULT_WATCH_BACKOFF_START_MS,
            ),
            watch_backoff_max_ms: var_or_default(
                lookup,
                "WATCH_BACKOFF_MAX_MS",
                DEFAULT_WATCH_BACKOFF_MAX_MS,
            ),
            watch_restart_delay_secs: var_or_default(
                lookup,
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: var_or_default(
                lookup,
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            webhook_failure_policy: var_or_default(
                lookup,
                "WEBHOOK_FAILURE_POLICY",
                FailurePolicy::Fail,
            ),
            webhook_timeout_secs: var_or_default(
                lookup,
                "WEBHOOK_TIMEOUT_SECS",
                DEFAULT_WEBHOOK_TIMEOUT_SECS,
            ),
            enable_tracing: var_or_default_bool(lookup, "ENABLE_TRACING", true),
        }
    }

    /// Check the settings that the reconciler depends on
    ///
    /// # Errors
    ///
    /// Returns the first setting found to be out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operand_image.trim().is_empty() {
            return Err(ConfigError::MissingOperandImage);
        }
        if self.operand_namespace.trim().is_empty() {
            return Err(ConfigError::MissingOperandNamespace);
        }
        if !(self.cert_refresh_fraction > 0.0 && self.cert_refresh_fraction < 1.0) {
            return Err(ConfigError::InvalidRefreshFraction(
                self.cert_refresh_fraction,
            ));
        }
        if self.cert_validity_days == 0 {
            return Err(ConfigError::InvalidCertValidity);
        }
        if self.operand_replicas <= 0 {
            return Err(ConfigError::InvalidReplicas(self.operand_replicas));
        }
        Ok(())
    }

    /// Serving certificate validity, capped at one hundred years
    #[must_use]
    pub fn cert_validity(&self) -> chrono::Duration {
        let days = i64::try_from(self.cert_validity_days.min(36_500)).unwrap_or(36_500);
        chrono::Duration::days(days)
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    #[must_use]
    pub fn not_ready_requeue(&self) -> Duration {
        Duration::from_secs(self.not_ready_requeue_secs)
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }

    /// Fully qualified DNS names the serving certificate must cover
    #[must_use]
    pub fn service_dns_names(&self) -> Vec<String> {
        let service = crate::constants::OPERAND_NAME;
        let ns = &self.operand_namespace;
        vec![
            format!("{service}.{ns}.svc"),
            format!("{service}.{ns}.svc.cluster.local"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.singleton_name, "cluster");
        assert_eq!(config.webhook_failure_policy, FailurePolicy::Fail);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let lookup = lookup_from(&[
            ("OPERAND_NAMESPACE", "custom-ns"),
            ("OPERAND_REPLICAS", "3"),
            ("CERT_REFRESH_FRACTION", "0.5"),
            ("WEBHOOK_FAILURE_POLICY", "Ignore"),
            ("ENABLE_TRACING", "off"),
        ]);
        let config = OperatorConfig::from_lookup(&lookup);
        assert_eq!(config.operand_namespace, "custom-ns");
        assert_eq!(config.operand_replicas, 3);
        assert!((config.cert_refresh_fraction - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.webhook_failure_policy, FailurePolicy::Ignore);
        assert!(!config.enable_tracing);
    }

    #[test]
    fn test_unparseable_values_fall_back_to_defaults() {
        let lookup = lookup_from(&[
            ("OPERAND_REPLICAS", "many"),
            ("WEBHOOK_FAILURE_POLICY", "sometimes"),
        ]);
        let config = OperatorConfig::from_lookup(&lookup);
        assert_eq!(config.operand_replicas, crate::constants::DEFAULT_OPERAND_REPLICAS);
        assert_eq!(config.webhook_failure_policy, FailurePolicy::Fail);
    }

    #[test]
    fn test_validate_rejects_out_of_range_settings() {
        let cases = vec![
            (
                OperatorConfig {
                    operand_image: "  ".to_string(),
                    ..OperatorConfig::default()
                },
                ConfigError::MissingOperandImage,
            ),
            (
                OperatorConfig {
                    cert_refresh_fraction: 1.0,
                    ..OperatorConfig::default()
                },
                ConfigError::InvalidRefreshFraction(1.0),
            ),
            (
                OperatorConfig {
                    cert_validity_days: 0,
                    ..OperatorConfig::default()
                },
                ConfigError::InvalidCertValidity,
            ),
            (
                OperatorConfig {
                    operand_replicas: 0,
                    ..OperatorConfig::default()
                },
                ConfigError::InvalidReplicas(0),
            ),
        ];

        for (config, expected) in cases {
            assert_eq!(config.validate(), Err(expected.clone()), "expected {expected}");
        }
    }

    #[test]
    fn test_service_dns_names() {
        let config = OperatorConfig {
            operand_namespace: "ns1".to_string(),
            ..OperatorConfig::default()
        };
        assert_eq!(
            config.service_dns_names(),
            vec![
                "runoncedurationoverride.ns1.svc".to_string(),
                "runoncedurationoverride.ns1.svc.cluster.local".to_string(),
            ]
        );
    }
}
