//! edos-metrics — near-real-time utilization cache for the worker pool.
//!
//! A background poller samples every tracked resource through the
//! injected `MetricsSource` and keeps the latest sample per resource. The
//! control loop only ever reads the cache, so its decision path never
//! waits on a sample.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector (cheap to clone, shared cache)
//!   ├── update_tracked() ← control loop, every tick
//!   ├── snapshot() / averages() ← control loop, every tick
//!   └── run() / spawn() → poll loop at a fixed interval
//!         └── MetricsSource::sample(id) per tracked id
//! ```

pub mod collector;

pub use collector::{Averages, MetricsCollector, MetricsPoller, MetricsSnapshot, PollStats};
