//! # Sync
//!
//! Keeps each child object of the webhook installation in its desired shape.
//!
//! - `kinds`: the seven child kinds and their API coordinates
//! - `desired`: templates for the desired objects
//! - `store`: the cluster API seam (`ResourceStore`) and its Kubernetes implementation
//! - `readiness`: per-kind readiness checks
//! - `synchronizer`: create or merge-patch a single child and report its readiness

pub mod desired;
mod kinds;
pub mod readiness;
mod store;
mod synchronizer;

pub use desired::{ChildTemplates, DesiredResource, TemplateError};
pub use kinds::ChildKind;
pub use readiness::Readiness;
pub use store::{KubeStore, ResourceStore, StoreError};
pub use synchronizer::{EnsureAction, EnsureOutcome, SyncError, Synchronizer};
