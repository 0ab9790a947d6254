//! Cumulative request statistics for one pool.
//!
//! Totals and RTT samples share a single mutex. Samples are append-only;
//! `report()` copies them out before computing anything.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::sender::RequestOutcome;

#[derive(Default)]
struct Counters {
    requests: u64,
    errors: u64,
    /// Round-trip times of successful requests, milliseconds.
    rtt_ms: Vec<f64>,
}

/// Shared, append-only request counters.
#[derive(Default)]
pub struct LoadStats {
    inner: Mutex<Counters>,
}

impl LoadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, outcome: RequestOutcome, rtt: Duration) {
        let mut c = self.inner.lock().await;
        c.requests += 1;
        if outcome.is_success() {
            c.rtt_ms.push(rtt.as_secs_f64() * 1000.0);
        } else {
            c.errors += 1;
        }
    }

    pub async fn report(&self) -> LoadReport {
        let (requests, errors, rtts) = {
            let c = self.inner.lock().await;
            (c.requests, c.errors, c.rtt_ms.clone())
        };

        let mean = if rtts.is_empty() {
            0.0
        } else {
            rtts.iter().sum::<f64>() / rtts.len() as f64
        };
        let (p50, p99) = compute_percentiles(&rtts);

        LoadReport {
            requests,
            errors,
            mean_rtt_ms: mean,
            p50_rtt_ms: p50,
            p99_rtt_ms: p99,
        }
    }
}

/// Point-in-time copy of a pool's statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    /// Requests issued, successful or not.
    pub requests: u64,
    pub errors: u64,
    pub mean_rtt_ms: f64,
    pub p50_rtt_ms: f64,
    pub p99_rtt_ms: f64,
}

impl LoadReport {
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64
        }
    }
}

/// P50 and P99 of `samples`. Returns (0.0, 0.0) if empty.
fn compute_percentiles(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p99_idx = (sorted.len() as f64 * 0.99) as usize;

    (
        sorted[p50_idx.min(sorted.len() - 1)],
        sorted[p99_idx.min(sorted.len() - 1)],
    )
}
