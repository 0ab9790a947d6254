//! edos-core — shared vocabulary for the edos scaling simulator.
//!
//! Holds the domain types passed between the control loop and its
//! collaborators, the two external seams (`ResourceManager` and
//! `MetricsSource`), error types, and the `SimConfig` TOML schema.

pub mod backend;
pub mod config;
pub mod error;
pub mod types;

pub use backend::{BoxFuture, MetricsSource, ResourceManager};
pub use config::{
    ControlConfig, CostConfig, EvictionPolicy, LoadConfig, MetricsConfig, ScalingConfig,
    SimConfig,
};
pub use error::{ConfigError, ResourceError, SampleError};
pub use types::*;
