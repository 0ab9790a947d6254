//! The request seam between workers and the transport.

use edos_core::{BoxFuture, Endpoint};

/// Result of one synthetic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// 2xx response.
    Success(u16),
    /// Any other status.
    Rejected(u16),
    /// Connection error or timeout.
    Failed,
}

impl RequestOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, RequestOutcome::Success(_))
    }
}

/// Issues one request against an endpoint.
///
/// Implementations bound their own latency; a worker waits for `send` to
/// resolve before it observes a stop signal.
pub trait RequestSender: Send + Sync {
    fn send<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, RequestOutcome>;
}
