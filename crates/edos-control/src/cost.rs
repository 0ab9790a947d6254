//! Instance-hour cost accounting.

use std::time::Duration;

/// Accumulates instance-seconds and prices them per instance-hour.
#[derive(Debug, Clone, PartialEq)]
pub struct CostMeter {
    per_instance_hour: f64,
    instance_secs: f64,
}

impl CostMeter {
    pub fn new(per_instance_hour: f64) -> Self {
        Self {
            per_instance_hour,
            instance_secs: 0.0,
        }
    }

    /// Charge `instances` running for `span`.
    pub fn add(&mut self, instances: usize, span: Duration) {
        if instances == 0 || span.is_zero() {
            return;
        }
        self.instance_secs += instances as f64 * span.as_secs_f64();
    }

    pub fn instance_hours(&self) -> f64 {
        self.instance_secs / 3600.0
    }

    pub fn total_cost(&self) -> f64 {
        self.instance_hours() * self.per_instance_hour
    }
}
