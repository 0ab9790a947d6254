//! Control loop error types.

use thiserror::Error;

use edos_core::{ConfigError, ResourceError};

/// Errors that abort a run. Everything per-resource is logged and retried
/// on the next tick instead.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("bootstrap failed after {started} of {wanted} instances: {source}")]
    Bootstrap {
        started: usize,
        wanted: usize,
        #[source]
        source: ResourceError,
    },
}

pub type ControlResult<T> = Result<T, ControlError>;
