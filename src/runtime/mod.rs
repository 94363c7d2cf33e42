//! # Runtime
//!
//! Process plumbing shared by the operator and the webhook binaries.

pub mod error_policy;
pub mod initialization;
pub mod signal;
pub mod watch_loop;
