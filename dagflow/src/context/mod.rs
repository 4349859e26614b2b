//! Run identity and execution contexts.
//!
//! This module provides:
//! - Run identities that scope a run's artifact namespace
//! - Execution contexts handed to the artifact store and to compute functions
//! - Run configuration for externally supplied task inputs

mod execution;
mod identity;
mod run_config;

pub use execution::ExecutionContext;
pub use identity::{make_new_run_id, RunIdentity};
pub use run_config::RunConfig;
