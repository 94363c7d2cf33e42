//! # Custom Resource Definitions
//!
//! The `RunOnceDurationOverride` resource and its status types.
//!
//! ```yaml
//! apiVersion: operator.openshift.io/v1
//! kind: RunOnceDurationOverride
//! metadata:
//!   name: cluster
//! spec:
//!   runOnceDurationOverride:
//!     spec:
//!       activeDeadlineSeconds: 3600
//! ```

mod spec;
mod status;

pub use spec::*;
pub use status::*;
