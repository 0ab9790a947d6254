//! edos-control — the closed-loop scaling controller.
//!
//! One `ControlLoop` owns the active resource set and, once per tick:
//!
//! ```text
//! update_tracked(active) → averages()        MetricsCollector (cache read)
//!   → evaluate(avg_cpu, len(active))         ScalingEngine
//!   → start() / stop(victim)                 ResourceManager
//!   → record_action(len(active))             ScalingEngine
//!   → reconcile attack + baseline pools      LoadGeneratorPool × 2
//!   → TickRecord (target "edos::tick")
//!   → sleep(max(0, interval - spent))
//! ```
//!
//! The steps run strictly in that order and ticks never overlap. The
//! deadline and the shutdown signal are only observed between ticks.

pub mod control_loop;
pub mod cost;
pub mod error;
pub mod record;
pub mod schedule;

pub use control_loop::ControlLoop;
pub use cost::CostMeter;
pub use error::{ControlError, ControlResult};
pub use record::{RunSummary, StopReason, TickRecord};
pub use schedule::{LoadSchedule, Phase};
