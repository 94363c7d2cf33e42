//! # Condition Tracker
//!
//! Maintains the status condition list with transition-time semantics:
//! `lastTransitionTime` only moves when a condition's status value changes,
//! and the serialized list is always ordered by type name.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::crd::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// The webhook is installed and serving
    Available,
    /// Installation is blocked by a failure
    InstallReadinessFailure,
}

impl ConditionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Available => "Available",
            ConditionType::InstallReadinessFailure => "InstallReadinessFailure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

/// Fixed set of reasons a condition may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    InvalidParameters,
    ConfigurationCheckFailed,
    CertNotAvailable,
    CannotSetReference,
    CannotGenerateCert,
    InternalError,
    AdmissionWebhookNotAvailable,
    DeploymentNotReady,
}

impl Reason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::InvalidParameters => "InvalidParameters",
            Reason::ConfigurationCheckFailed => "ConfigurationCheckFailed",
            Reason::CertNotAvailable => "CertNotAvailable",
            Reason::CannotSetReference => "CannotSetReference",
            Reason::CannotGenerateCert => "CannotGenerateCert",
            Reason::InternalError => "InternalError",
            Reason::AdmissionWebhookNotAvailable => "AdmissionWebhookNotAvailable",
            Reason::DeploymentNotReady => "DeploymentNotReady",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Working copy of a resource's conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    conditions: BTreeMap<String, Condition>,
}

impl ConditionSet {
    /// Start from the conditions currently recorded in status
    #[must_use]
    pub fn from_conditions(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions
                .iter()
                .map(|c| (c.r#type.clone(), c.clone()))
                .collect(),
        }
    }

    /// Insert or update a condition
    ///
    /// The transition time is preserved when the status value is unchanged,
    /// even if reason or message differ.
    pub fn set(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: Option<Reason>,
        message: Option<String>,
        now: DateTime<Utc>,
    ) {
        let key = condition_type.as_str().to_string();
        let transition_time = match self.conditions.get(&key) {
            Some(existing) if existing.status == status.as_str() => {
                existing.last_transition_time.clone()
            }
            _ => Some(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        };

        self.conditions.insert(
            key.clone(),
            Condition {
                r#type: key,
                status: status.as_str().to_string(),
                reason: reason.map(|r| r.as_str().to_string()),
                message,
                last_transition_time: transition_time,
            },
        );
    }

    /// Remove a condition; a no-op when absent
    pub fn remove(&mut self, condition_type: ConditionType) {
        self.conditions.remove(condition_type.as_str());
    }

    #[must_use]
    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions.get(condition_type.as_str())
    }

    #[must_use]
    pub fn is_true(&self, condition_type: ConditionType) -> bool {
        self.get(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True.as_str())
    }

    /// Conditions ordered by type name
    #[must_use]
    pub fn into_vec(self) -> Vec<Condition> {
        self.conditions.into_values().collect()
    }
}
