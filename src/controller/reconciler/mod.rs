//! # Reconciler
//!
//! Reconciliation logic for the singleton `RunOnceDurationOverride`.
//!
//! The reconciler:
//! - Validates the resource and the operator settings
//! - Issues and rotates the webhook serving certificate
//! - Keeps the seven children of the webhook installation in their desired shape
//! - Reports progress through the `Available` and `InstallReadinessFailure` conditions

pub mod reconcile;
pub mod status;
pub mod types;
pub mod validation;

pub use reconcile::{reconcile, reconcile_at};
pub use types::{BackoffState, Reconciler, ReconcilerError};
