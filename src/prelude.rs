//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use run_once_duration_override_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Reconciler
pub use crate::controller::reconciler::{
    reconcile, reconcile_at, BackoffState, Reconciler, ReconcilerError,
};

// Child synchronization seam
pub use crate::controller::sync::{ChildKind, ResourceStore, StoreError};

// Certificate issuance seam
pub use crate::controller::cert::{CertGenerator, ServingCertMaterial};

// Configuration
pub use crate::config::{
    ConfigError, OperatorConfig, ServerConfig, SharedOperatorConfig, SharedServerConfig,
};

// Admission
pub use crate::admission::{ActiveConfig, Mutation, RestartPolicy};
