//! External collaborator seams.
//!
//! The control loop never creates worker processes or reads raw
//! utilization itself. Both are delegated to implementations of these
//! traits, injected at construction time. Implementations are expected to
//! bound their own network timeouts.

use std::future::Future;
use std::pin::Pin;

use crate::error::{ResourceError, SampleError};
use crate::types::{Resource, ResourceId, ResourceUsage};

/// Boxed, sendable future returned by the seam traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Creates and destroys worker resources.
pub trait ResourceManager: Send + Sync {
    /// Start one new worker and return its handle.
    fn start(&self) -> BoxFuture<'_, Result<Resource, ResourceError>>;

    /// Stop a worker previously returned by `start`.
    fn stop<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, Result<(), ResourceError>>;
}

/// Reads point-in-time utilization for one resource.
pub trait MetricsSource: Send + Sync {
    /// Sample `id`. `SampleError::NotFound` means the resource is gone.
    fn sample<'a>(&'a self, id: &'a ResourceId) -> BoxFuture<'a, Result<ResourceUsage, SampleError>>;
}
