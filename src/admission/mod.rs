//! # Admission
//!
//! The mutating admission webhook served by the operand.
//!
//! - `config`: configuration document and the active copy
//! - `mutator`: pod mutation decision
//! - `handler`: `AdmissionReview` handling
//! - `server`: HTTPS server
//! - `watch`: configuration loading and hot reload

pub mod config;
pub mod handler;
pub mod mutator;
pub mod server;
pub mod watch;

pub use config::{parse_configuration, render_configuration, ActiveConfig};
pub use handler::WebhookState;
pub use mutator::{evaluate, mutate, Mutation, RestartPolicy};
