//! edos-autoscale — CPU-driven scaling decisions.
//!
//! Converts the pool's average CPU utilization into a `Decision`, one
//! instance at a time, under a single cooldown window shared by scale-up
//! and scale-down.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if now - last_action_at < cooldown:      NoAction   (cooldown wins)
//! elif avg_cpu > scale_up_threshold:
//!     ScaleUp   if count < max_instances   else NoAction (ceiling)
//! elif avg_cpu < scale_down_threshold:
//!     ScaleDown if count > min_instances   else NoAction (floor)
//! else:                                    NoAction   (dead band)
//! ```
//!
//! Deciding and recording are separate steps: the engine only starts a
//! new cooldown window once the caller reports, via `record_action`, that
//! the instance count actually changed.

pub mod scaler;

pub use scaler::{DecisionReason, ScalingEngine, ScalingPolicy, Verdict};
