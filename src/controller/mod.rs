//! # Controller
//!
//! Core operator modules.
//!
//! - `backoff`: Fibonacci backoff for failed passes
//! - `cert`: serving certificate generation
//! - `conditions`: condition bookkeeping
//! - `hash`: deterministic digests for drift detection
//! - `reconciler`: the reconciliation pass
//! - `rotation`: certificate rotation scheduling
//! - `server`: HTTP server for metrics and health checks
//! - `sync`: child object synchronization

pub mod backoff;
pub mod cert;
pub mod conditions;
pub mod hash;
pub mod reconciler;
pub mod rotation;
pub mod server;
pub mod sync;
