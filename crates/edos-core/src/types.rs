//! Domain types shared by the control loop and its collaborators.

use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque identifier of one running worker resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A load-target address in `scheme://host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Plain-HTTP endpoint.
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: "http".to_string(),
            host: host.into(),
            port,
        }
    }

    /// Full URL for `path` on this endpoint.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{self}{path}")
        } else {
            format!("{self}/{path}")
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// A running worker as seen by the control loop.
///
/// Owned by the control loop's active set. Other components only ever
/// receive copies of the id or endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub endpoint: Endpoint,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: u64,
}

impl Resource {
    pub fn new(id: impl Into<ResourceId>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            endpoint,
            created_at: epoch_secs(),
        }
    }
}

/// Point-in-time utilization reported by a `MetricsSource`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub mem_bytes: u64,
}

/// One cached utilization sample. Replaced, never mutated, by the next
/// sample for the same resource.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub resource_id: ResourceId,
    pub cpu_percent: f64,
    pub mem_bytes: u64,
    pub sampled_at: Instant,
}

impl MetricSample {
    pub fn new(resource_id: ResourceId, usage: ResourceUsage) -> Self {
        Self {
            resource_id,
            // Sources occasionally report tiny negative deltas.
            cpu_percent: usage.cpu_percent.max(0.0),
            mem_bytes: usage.mem_bytes,
            sampled_at: Instant::now(),
        }
    }
}

/// Outcome of one scaling evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    ScaleUp,
    ScaleDown,
    NoAction,
}

impl Decision {
    /// Whether this decision asks for a change in instance count.
    pub fn is_action(self) -> bool {
        !matches!(self, Decision::NoAction)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::ScaleUp => "ScaleUp",
            Decision::ScaleDown => "ScaleDown",
            Decision::NoAction => "NoAction",
        };
        f.write_str(s)
    }
}

/// Which kind of synthetic traffic a tick ran under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLabel {
    Normal,
    Attack,
}

impl fmt::Display for TrafficLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficLabel::Normal => f.write_str("normal"),
            TrafficLabel::Attack => f.write_str("attack"),
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
