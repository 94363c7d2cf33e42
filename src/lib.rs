//! RunOnceDurationOverride Operator Library
//!
//! Core functionality for the operator that installs the run-once duration
//! override admission webhook, and for the webhook itself.
//! Tests are included in the module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use run_once_duration_override_operator::prelude::*;
//! ```

pub mod admission;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
