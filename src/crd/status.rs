//! # Status
//!
//! Observed state written back by the operator.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunOnceDurationOverrideStatus {
    /// References to every child object the operator manages
    #[serde(default)]
    pub resources: OverrideResources,
    /// Digests of the configuration and serving certificate in effect
    #[serde(default)]
    pub hash: OverrideResourceHash,
    /// Sorted by type name
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Operand version
    #[serde(default)]
    pub version: Option<String>,
    /// Operand image
    #[serde(default)]
    pub image: Option<String>,
    /// When the serving certificate is next due for rotation (RFC3339)
    #[serde(default)]
    pub certs_rotate_at: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Weak references to the managed children
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverrideResources {
    #[serde(default)]
    pub configuration_ref: Option<ResourceReference>,
    #[serde(default, rename = "serviceCAConfigMapRef")]
    pub service_ca_config_map_ref: Option<ResourceReference>,
    #[serde(default)]
    pub service_ref: Option<ResourceReference>,
    #[serde(default)]
    pub service_cert_secret_ref: Option<ResourceReference>,
    #[serde(default)]
    pub deployment_ref: Option<ResourceReference>,
    #[serde(default, rename = "apiServiceRef")]
    pub api_service_ref: Option<ResourceReference>,
    #[serde(default)]
    pub mutating_webhook_configuration_ref: Option<ResourceReference>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverrideResourceHash {
    /// Digest of the admission configuration
    #[serde(default)]
    pub configuration: Option<String>,
    /// Digest of the serving certificate and key
    #[serde(default)]
    pub serving_cert: Option<String>,
}

/// Reference to a child object by identity
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub last_transition_time: Option<String>,
}
