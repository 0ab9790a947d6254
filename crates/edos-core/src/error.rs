//! Error types for the external seams and configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ResourceId;

/// Errors reported by a `ResourceManager`. All are treated as transient.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to start resource: {0}")]
    Start(String),

    #[error("failed to stop resource {id}: {reason}")]
    Stop { id: ResourceId, reason: String },
}

/// Errors reported by a `MetricsSource`.
#[derive(Debug, Error)]
pub enum SampleError {
    /// The resource disappeared externally.
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    #[error("failed to sample {id}: {reason}")]
    Failed { id: ResourceId, reason: String },

    #[error("sampling {0} timed out")]
    Timeout(ResourceId),
}

/// Errors loading or validating a `SimConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
