//! One paced load worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use edos_core::Endpoint;

use crate::sender::RequestSender;
use crate::stats::LoadStats;

/// Per-worker totals, returned when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub requests: u64,
    pub errors: u64,
}

pub(crate) struct WorkerTask {
    pub(crate) pool: String,
    pub(crate) index: usize,
    pub(crate) endpoint: Endpoint,
    /// Target spacing between request starts (1 / rate).
    pub(crate) interval: Duration,
    pub(crate) sender: Arc<dyn RequestSender>,
    pub(crate) stats: Arc<LoadStats>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl WorkerTask {
    /// Issue, measure, pace, until the stop signal.
    ///
    /// An in-flight request always completes. When a request takes longer
    /// than `interval` the next one goes out immediately; missed slots are
    /// not made up.
    pub(crate) async fn run(mut self) -> WorkerSummary {
        let mut summary = WorkerSummary::default();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            let outcome = self.sender.send(&self.endpoint).await;
            let rtt = started.elapsed();

            summary.requests += 1;
            if !outcome.is_success() {
                summary.errors += 1;
            }
            self.stats.record(outcome, rtt).await;

            let pause = self.interval.saturating_sub(started.elapsed());
            if pause.is_zero() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(
            pool = %self.pool,
            worker = self.index,
            endpoint = %self.endpoint,
            requests = summary.requests,
            errors = summary.errors,
            "load worker stopped"
        );
        summary
    }
}
