//! Per-tick records and the end-of-run summary.

use serde::Serialize;

use edos_core::{Decision, TrafficLabel};
use edos_loadgen::LoadReport;

/// What one tick observed and did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickRecord {
    pub tick: u64,
    /// Seconds since the run started, taken at the start of the tick.
    pub elapsed_secs: f64,
    /// Active instances after this tick's scaling action.
    pub instance_count: usize,
    pub avg_cpu_percent: f64,
    pub avg_mem_bytes: f64,
    pub decision: Decision,
    pub reason: &'static str,
    pub endpoints: Vec<String>,
    pub label: TrafficLabel,
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Deadline,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub ticks: u64,
    pub elapsed_secs: f64,
    pub final_instance_count: usize,
    pub attack: LoadReport,
    pub baseline: LoadReport,
    pub instance_hours: f64,
    pub total_cost: f64,
    pub records: Vec<TickRecord>,
}

impl RunSummary {
    /// Ticks that decided to scale, whether or not the action succeeded.
    pub fn actions(&self) -> impl Iterator<Item = &TickRecord> {
        self.records.iter().filter(|r| r.decision.is_action())
    }

    pub fn peak_instance_count(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.instance_count)
            .max()
            .unwrap_or(self.final_instance_count)
    }
}
