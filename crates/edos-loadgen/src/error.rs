//! Load generator error types.

use thiserror::Error;

/// Errors returned by `LoadGeneratorPool::start`.
#[derive(Debug, Error, PartialEq)]
pub enum LoadGenError {
    #[error("load generator {0} is already running")]
    AlreadyRunning(String),

    #[error("no target endpoints given")]
    NoTargets,

    #[error("request rate must be a positive number, got {0}")]
    InvalidRate(f64),

    #[error("worker count must be at least 1")]
    NoWorkers,
}
