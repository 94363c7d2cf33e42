//! # Configuration
//!
//! Operator and server settings loaded from environment variables.
//!
//! Both are shared behind `Arc<RwLock<_>>` so that each reconciliation pass
//! takes an immutable snapshot at its start.

mod operator;
mod server;

pub use operator::*;
pub use server::*;

use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared operator configuration
pub type SharedOperatorConfig = Arc<RwLock<OperatorConfig>>;

/// Shared server configuration
pub type SharedServerConfig = Arc<RwLock<ServerConfig>>;

/// Create shared configuration from environment variables
#[must_use]
pub fn create_shared_config() -> (SharedOperatorConfig, SharedServerConfig) {
    (
        Arc::new(RwLock::new(OperatorConfig::from_env())),
        Arc::new(RwLock::new(ServerConfig::from_env())),
    )
}

/// Read a value from `lookup` or return default
pub(crate) fn var_or_default<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a value from `lookup` as boolean or return default
pub(crate) fn var_or_default_bool(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> bool {
    lookup(key)
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read a value from `lookup` as string or return default
pub(crate) fn var_or_default_str(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

pub(crate) fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
