//! Scaling engine — threshold decisions with a shared cooldown window.
//!
//! The engine is pure arithmetic over caller-supplied inputs: it never
//! talks to the resource manager and has no failure mode of its own. The
//! caller owns the authoritative instance count and passes it in on every
//! `decide`, then reports the post-action count through `record_action`.

use std::time::{Duration, Instant};

use tracing::debug;

use edos_core::{Decision, ScalingConfig};

/// Thresholds and bounds the engine evaluates against.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub min_instances: u32,
    pub max_instances: u32,
    pub cooldown: Duration,
}

impl From<&ScalingConfig> for ScalingPolicy {
    fn from(config: &ScalingConfig) -> Self {
        Self {
            scale_up_threshold: config.scale_up_threshold,
            scale_down_threshold: config.scale_down_threshold,
            min_instances: config.min_instances,
            max_instances: config.max_instances,
            cooldown: config.cooldown(),
        }
    }
}

/// Why the engine reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// Inside the cooldown window; thresholds were not consulted.
    Cooldown,
    /// CPU above the scale-up threshold with room to grow.
    AboveThreshold,
    /// CPU above the scale-up threshold but already at `max_instances`.
    AtCeiling,
    /// CPU below the scale-down threshold with room to shrink.
    BelowThreshold,
    /// CPU below the scale-down threshold but already at `min_instances`.
    AtFloor,
    /// CPU inside the dead band, thresholds inclusive.
    WithinBand,
    /// No utilization samples yet. Produced by callers, never by the engine.
    NoData,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::Cooldown => "cooldown",
            DecisionReason::AboveThreshold => "above-threshold",
            DecisionReason::AtCeiling => "at-ceiling",
            DecisionReason::BelowThreshold => "below-threshold",
            DecisionReason::AtFloor => "at-floor",
            DecisionReason::WithinBand => "within-band",
            DecisionReason::NoData => "no-data",
        }
    }
}

/// A decision together with its reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: DecisionReason,
}

impl Verdict {
    fn hold(reason: DecisionReason) -> Self {
        Self {
            decision: Decision::NoAction,
            reason,
        }
    }
}

/// An action proposed by `evaluate` that `record_action` has not settled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingAction {
    proposed_at: Instant,
    from_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ScalingState {
    /// When the instance count last changed. `None` until the first action.
    last_action_at: Option<Instant>,
    current_count: u32,
    pending: Option<PendingAction>,
}

/// Decides scale-up / scale-down / no-action from average CPU.
#[derive(Debug, Clone)]
pub struct ScalingEngine {
    policy: ScalingPolicy,
    state: ScalingState,
}

impl ScalingEngine {
    pub fn new(policy: ScalingPolicy) -> Self {
        Self {
            policy,
            state: ScalingState::default(),
        }
    }

    /// Set the starting instance count without opening a cooldown window.
    pub fn with_initial_count(mut self, count: u32) -> Self {
        self.state.current_count = count;
        self
    }

    pub fn current_count(&self) -> u32 {
        self.state.current_count
    }

    /// Decide against the wall clock.
    pub fn decide(&mut self, avg_cpu_percent: f64, current_count: u32) -> Decision {
        self.decide_at(avg_cpu_percent, current_count, Instant::now())
    }

    pub fn decide_at(&mut self, avg_cpu_percent: f64, current_count: u32, now: Instant) -> Decision {
        self.evaluate_at(avg_cpu_percent, current_count, now).decision
    }

    pub fn evaluate(&mut self, avg_cpu_percent: f64, current_count: u32) -> Verdict {
        self.evaluate_at(avg_cpu_percent, current_count, Instant::now())
    }

    /// Evaluate one tick.
    ///
    /// `current_count` always overwrites the engine's own count first: only
    /// the caller knows about resources lost out of band.
    ///
    /// An action proposed by the previous call and never settled through
    /// `record_action` is taken as applied, so its cooldown starts at the
    /// time it was proposed.
    pub fn evaluate_at(&mut self, avg_cpu_percent: f64, current_count: u32, now: Instant) -> Verdict {
        if let Some(pending) = self.state.pending.take() {
            debug!(
                from = pending.from_count,
                to = current_count,
                "unrecorded scale action assumed applied, cooldown started"
            );
            self.state.last_action_at = Some(pending.proposed_at);
        }
        self.state.current_count = current_count;

        let verdict = self.threshold_verdict(avg_cpu_percent, now);
        if verdict.decision.is_action() {
            self.state.pending = Some(PendingAction {
                proposed_at: now,
                from_count: current_count,
            });
        }
        verdict
    }

    fn threshold_verdict(&self, avg_cpu_percent: f64, now: Instant) -> Verdict {
        let current_count = self.state.current_count;
        let p = &self.policy;

        let remaining = self.cooldown_remaining_at(now);
        if !remaining.is_zero() {
            debug!(
                remaining_secs = remaining.as_secs_f64(),
                avg_cpu = avg_cpu_percent,
                "in cooldown, no scaling"
            );
            return Verdict::hold(DecisionReason::Cooldown);
        }

        if avg_cpu_percent > p.scale_up_threshold {
            if current_count < p.max_instances {
                debug!(
                    avg_cpu = avg_cpu_percent,
                    threshold = p.scale_up_threshold,
                    count = current_count,
                    max = p.max_instances,
                    "scale up"
                );
                return Verdict {
                    decision: Decision::ScaleUp,
                    reason: DecisionReason::AboveThreshold,
                };
            }
            debug!(
                avg_cpu = avg_cpu_percent,
                max = p.max_instances,
                "scale-up condition met but at max instances"
            );
            return Verdict::hold(DecisionReason::AtCeiling);
        }

        if avg_cpu_percent < p.scale_down_threshold {
            if current_count > p.min_instances {
                debug!(
                    avg_cpu = avg_cpu_percent,
                    threshold = p.scale_down_threshold,
                    count = current_count,
                    min = p.min_instances,
                    "scale down"
                );
                return Verdict {
                    decision: Decision::ScaleDown,
                    reason: DecisionReason::BelowThreshold,
                };
            }
            debug!(
                avg_cpu = avg_cpu_percent,
                min = p.min_instances,
                "scale-down condition met but at min instances"
            );
            return Verdict::hold(DecisionReason::AtFloor);
        }

        Verdict::hold(DecisionReason::WithinBand)
    }

    /// Record the count after this tick's action (or non-action).
    ///
    /// Returns `true` when the count changed, which starts a new cooldown
    /// window. A failed or reverted action leaves the count unchanged and
    /// therefore does not delay the retry. Either way the proposed action
    /// is settled.
    pub fn record_action(&mut self, new_count: u32) -> bool {
        self.record_action_at(new_count, Instant::now())
    }

    pub fn record_action_at(&mut self, new_count: u32, now: Instant) -> bool {
        self.state.pending = None;
        let changed = new_count != self.state.current_count;
        if changed {
            debug!(
                from = self.state.current_count,
                to = new_count,
                cooldown_secs = self.policy.cooldown.as_secs_f64(),
                "scale action recorded, cooldown started"
            );
            self.state.last_action_at = Some(now);
        }
        self.state.current_count = new_count;
        changed
    }

    /// Overwrite the count without touching the cooldown window.
    pub fn resync(&mut self, count: u32) {
        self.state.current_count = count;
    }

    pub fn in_cooldown_at(&self, now: Instant) -> bool {
        !self.cooldown_remaining_at(now).is_zero()
    }

    /// Time left in the current cooldown window, zero when eligible.
    pub fn cooldown_remaining_at(&self, now: Instant) -> Duration {
        match self.state.last_action_at {
            Some(last) => self
                .policy
                .cooldown
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}
