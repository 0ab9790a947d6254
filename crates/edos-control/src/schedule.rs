//! Attack window schedule.

use std::time::Duration;

use edos_core::LoadConfig;

/// Which traffic the schedule calls for at a point in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Normal,
    Attack,
}

/// A single attack window, relative to the start of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSchedule {
    pub attack_start: Duration,
    pub attack_duration: Duration,
}

impl LoadSchedule {
    pub fn new(attack_start: Duration, attack_duration: Duration) -> Self {
        Self {
            attack_start,
            attack_duration,
        }
    }

    /// `Attack` inside `[start, start + duration)`. A zero duration never
    /// attacks.
    pub fn phase(&self, elapsed: Duration) -> Phase {
        let end = self.attack_start.saturating_add(self.attack_duration);
        if elapsed >= self.attack_start && elapsed < end {
            Phase::Attack
        } else {
            Phase::Normal
        }
    }
}

impl From<&LoadConfig> for LoadSchedule {
    fn from(config: &LoadConfig) -> Self {
        Self::new(config.attack_start(), config.attack_duration())
    }
}
