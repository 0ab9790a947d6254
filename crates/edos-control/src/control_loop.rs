//! Control loop — one fixed-period tick over metrics, scaling and load.
//!
//! The loop owns the active resource set. The metrics collector and the
//! load generator pools only ever receive copies of ids and endpoints.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use edos_autoscale::{DecisionReason, ScalingEngine, ScalingPolicy, Verdict};
use edos_core::{
    Decision, Endpoint, EvictionPolicy, MetricsSource, Resource, ResourceId, ResourceManager,
    SimConfig, TrafficLabel,
};
use edos_loadgen::{LoadGeneratorPool, RequestSender};
use edos_metrics::{MetricsCollector, MetricsSnapshot};

use crate::cost::CostMeter;
use crate::error::{ControlError, ControlResult};
use crate::record::{RunSummary, StopReason, TickRecord};
use crate::schedule::{LoadSchedule, Phase};

/// Drives one simulation run.
pub struct ControlLoop {
    config: SimConfig,
    manager: Arc<dyn ResourceManager>,
    collector: MetricsCollector,
    engine: ScalingEngine,
    attack: LoadGeneratorPool,
    baseline: LoadGeneratorPool,
    schedule: LoadSchedule,
    cost: CostMeter,
    /// Start order; the last element is the newest resource.
    active: Vec<Resource>,
}

impl ControlLoop {
    /// Validate `config` and wire the collaborators together. Nothing is
    /// started until `run`.
    pub fn new(
        config: SimConfig,
        manager: Arc<dyn ResourceManager>,
        source: Arc<dyn MetricsSource>,
        sender: Arc<dyn RequestSender>,
    ) -> ControlResult<Self> {
        config.validate()?;

        let collector = MetricsCollector::new(source, config.metrics.poll_interval())
            .with_sample_timeout(config.metrics.sample_timeout());
        let engine = ScalingEngine::new(ScalingPolicy::from(&config.scaling));
        let join_timeout = config.load.join_timeout();

        Ok(Self {
            collector,
            engine,
            attack: LoadGeneratorPool::new("attack", Arc::clone(&sender), join_timeout),
            baseline: LoadGeneratorPool::new("baseline", sender, join_timeout),
            schedule: LoadSchedule::from(&config.load),
            cost: CostMeter::new(config.cost.per_instance_hour),
            manager,
            active: Vec::new(),
            config,
        })
    }

    pub fn active(&self) -> &[Resource] {
        &self.active
    }

    /// Hand the still-active resources to the caller for teardown.
    pub fn take_resources(&mut self) -> Vec<Resource> {
        std::mem::take(&mut self.active)
    }

    /// Bootstrap the minimum pool, then tick until the run deadline passes
    /// or `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Both exits stop the load generators and the metrics poller before
    /// returning. Resources are left running; see `take_resources`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> ControlResult<RunSummary> {
        self.bootstrap().await?;
        self.engine.resync(self.active.len() as u32);
        self.collector.update_tracked(self.active_ids()).await;
        let poller = self.collector.spawn();

        let tick_interval = self.config.control.tick_interval();
        let run_duration = self.config.control.run_duration();

        info!(
            instances = self.active.len(),
            tick_secs = tick_interval.as_secs_f64(),
            run_secs = run_duration.as_secs_f64(),
            "control loop started"
        );

        let started = Instant::now();
        let mut records = Vec::new();
        let mut ticks = 0u64;
        let mut charged_at = started;
        let mut charged_count = self.active.len();

        let stop_reason = loop {
            // A dropped sender counts as cancellation even when overrunning
            // ticks never reach the pause below.
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break StopReason::Cancelled;
            }
            let tick_start = Instant::now();
            let elapsed = tick_start.duration_since(started);
            if elapsed >= run_duration {
                break StopReason::Deadline;
            }

            ticks += 1;
            let record = self.tick(ticks, elapsed).await;

            let now = Instant::now();
            self.cost.add(charged_count, now.duration_since(charged_at));
            charged_at = now;
            charged_count = record.instance_count;
            records.push(record);

            let spent = tick_start.elapsed();
            let pause = tick_interval.saturating_sub(spent);
            if pause.is_zero() {
                warn!(
                    tick = ticks,
                    spent_ms = spent.as_millis() as u64,
                    interval_ms = tick_interval.as_millis() as u64,
                    "tick overran its interval, not sleeping"
                );
                continue;
            }
            let pause = pause.min(run_duration.saturating_sub(started.elapsed()));

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break StopReason::Cancelled;
                    }
                }
            }
        };

        let finished = Instant::now();
        self.cost.add(charged_count, finished.duration_since(charged_at));

        self.attack.stop().await;
        self.baseline.stop().await;
        poller
            .stop(self.config.metrics.poll_interval() + self.config.metrics.sample_timeout())
            .await;

        let summary = RunSummary {
            stop_reason,
            ticks,
            elapsed_secs: finished.duration_since(started).as_secs_f64(),
            final_instance_count: self.active.len(),
            attack: self.attack.report().await,
            baseline: self.baseline.report().await,
            instance_hours: self.cost.instance_hours(),
            total_cost: self.cost.total_cost(),
            records,
        };

        info!(
            reason = ?summary.stop_reason,
            ticks,
            instances = summary.final_instance_count,
            instance_hours = summary.instance_hours,
            total_cost = summary.total_cost,
            "control loop stopped"
        );
        Ok(summary)
    }

    async fn bootstrap(&mut self) -> ControlResult<()> {
        let wanted = self.config.scaling.min_instances as usize;
        while self.active.len() < wanted {
            match self.manager.start().await {
                Ok(resource) => {
                    debug!(
                        resource_id = %resource.id,
                        endpoint = %resource.endpoint,
                        "bootstrap instance started"
                    );
                    self.active.push(resource);
                }
                Err(source) => {
                    let started = self.active.len();
                    error!(started, wanted, error = %source, "bootstrap failed, tearing down");
                    self.teardown().await;
                    return Err(ControlError::Bootstrap {
                        started,
                        wanted,
                        source,
                    });
                }
            }
        }
        info!(instances = wanted, "bootstrap complete");
        Ok(())
    }

    /// Stop every active resource, newest first. Resources that refuse to
    /// stop stay in the active set.
    async fn teardown(&mut self) {
        let mut kept = Vec::new();
        for resource in std::mem::take(&mut self.active).into_iter().rev() {
            if let Err(e) = self.manager.stop(&resource).await {
                warn!(
                    resource_id = %resource.id,
                    operation = "stop",
                    error = %e,
                    "teardown stop failed"
                );
                kept.push(resource);
            }
        }
        kept.reverse();
        self.active = kept;
    }

    async fn tick(&mut self, tick: u64, elapsed: Duration) -> TickRecord {
        self.check_count();

        self.collector.update_tracked(self.active_ids()).await;
        let averages = self.collector.averages().await;

        let count = self.active.len() as u32;
        let verdict = if averages.is_empty() {
            // Warm-up: an empty cache is not zero load.
            self.engine.resync(count);
            Verdict {
                decision: Decision::NoAction,
                reason: DecisionReason::NoData,
            }
        } else {
            self.engine.evaluate(averages.avg_cpu_percent, count)
        };

        match verdict.decision {
            Decision::ScaleUp => self.scale_up().await,
            Decision::ScaleDown => self.scale_down().await,
            Decision::NoAction => {}
        }

        if self.engine.record_action(self.active.len() as u32) {
            self.collector.update_tracked(self.active_ids()).await;
        }

        let endpoints: Vec<Endpoint> = self.active.iter().map(|r| r.endpoint.clone()).collect();
        let label = self.reconcile_load(elapsed, &endpoints).await;

        let record = TickRecord {
            tick,
            elapsed_secs: elapsed.as_secs_f64(),
            instance_count: self.active.len(),
            avg_cpu_percent: averages.avg_cpu_percent,
            avg_mem_bytes: averages.avg_mem_bytes,
            decision: verdict.decision,
            reason: verdict.reason.as_str(),
            endpoints: endpoints.iter().map(ToString::to_string).collect(),
            label,
        };

        info!(
            target: "edos::tick",
            tick,
            elapsed_secs = record.elapsed_secs,
            instances = record.instance_count,
            avg_cpu = record.avg_cpu_percent,
            avg_mem_bytes = record.avg_mem_bytes,
            decision = %record.decision,
            reason = record.reason,
            endpoints = %record.endpoints.join(","),
            label = %record.label,
            "tick"
        );
        record
    }

    /// The engine's count must match the active set at every tick boundary.
    fn check_count(&mut self) {
        let actual = self.active.len() as u32;
        let recorded = self.engine.current_count();
        if actual != recorded {
            debug_assert_eq!(actual, recorded, "scaling state drifted from the active set");
            warn!(recorded, actual, "scaling state out of sync, resyncing from active set");
            self.engine.resync(actual);
        }
    }

    async fn scale_up(&mut self) {
        match self.manager.start().await {
            Ok(resource) => {
                info!(
                    resource_id = %resource.id,
                    endpoint = %resource.endpoint,
                    instances = self.active.len() + 1,
                    "scaled up"
                );
                self.active.push(resource);
            }
            Err(e) => {
                warn!(
                    operation = "start",
                    error = %e,
                    instances = self.active.len(),
                    "scale up failed, retrying next tick"
                );
            }
        }
    }

    async fn scale_down(&mut self) {
        let Some(index) = self.pick_victim().await else {
            return;
        };
        let victim = self.active.remove(index);

        match self.manager.stop(&victim).await {
            Ok(()) => {
                info!(
                    resource_id = %victim.id,
                    instances = self.active.len(),
                    "scaled down"
                );
            }
            Err(e) => {
                warn!(
                    resource_id = %victim.id,
                    operation = "stop",
                    error = %e,
                    "scale down failed, keeping resource"
                );
                self.active.insert(index, victim);
            }
        }
    }

    async fn pick_victim(&self) -> Option<usize> {
        let newest = self.active.len().checked_sub(1)?;
        match self.config.scaling.eviction {
            EvictionPolicy::Newest => Some(newest),
            EvictionPolicy::LeastLoaded => {
                let snapshot = self.collector.snapshot().await;
                Some(least_loaded(&self.active, &snapshot).unwrap_or(newest))
            }
        }
    }

    /// Start, stop or retarget both pools for this tick. Returns the label
    /// for the tick record.
    async fn reconcile_load(&self, elapsed: Duration, endpoints: &[Endpoint]) -> TrafficLabel {
        let load = &self.config.load;
        let attacking = self.schedule.phase(elapsed) == Phase::Attack;

        let attack = PoolPlan {
            wanted: attacking && load.worker_count > 0,
            rate: load.rate_per_worker,
            workers: load.worker_count as usize,
        };
        let baseline = PoolPlan {
            wanted: !attacking && load.baseline_worker_count > 0,
            rate: load.baseline_rate_per_worker,
            workers: load.baseline_worker_count as usize,
        };

        // The pool being switched off stops first.
        if attacking {
            reconcile_pool(&self.baseline, baseline, endpoints).await;
            reconcile_pool(&self.attack, attack, endpoints).await;
        } else {
            reconcile_pool(&self.attack, attack, endpoints).await;
            reconcile_pool(&self.baseline, baseline, endpoints).await;
        }

        if self.attack.is_running().await {
            TrafficLabel::Attack
        } else {
            TrafficLabel::Normal
        }
    }

    fn active_ids(&self) -> Vec<ResourceId> {
        self.active.iter().map(|r| r.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolPlan {
    wanted: bool,
    rate: f64,
    workers: usize,
}

/// Bring `pool` in line with `plan`. A running pool is restarted only when
/// the membership of its target set differs from `endpoints`.
async fn reconcile_pool(pool: &LoadGeneratorPool, plan: PoolPlan, endpoints: &[Endpoint]) {
    let running = pool.is_running().await;

    if !plan.wanted || endpoints.is_empty() {
        if running {
            pool.stop().await;
        }
        return;
    }

    let result = if !running {
        pool.start(endpoints, plan.rate, plan.workers).await
    } else if same_members(&pool.targets().await, endpoints) {
        return;
    } else {
        debug!(
            pool = pool.name(),
            targets = endpoints.len(),
            "load target set changed, restarting"
        );
        pool.restart(endpoints, plan.rate, plan.workers).await
    };

    if let Err(e) = result {
        warn!(
            pool = pool.name(),
            operation = "start",
            error = %e,
            "load generator start failed"
        );
    }
}

fn same_members(a: &[Endpoint], b: &[Endpoint]) -> bool {
    a.iter().collect::<HashSet<_>>() == b.iter().collect::<HashSet<_>>()
}

/// Index of the active resource with the lowest cached CPU. Ties go to the
/// newer resource. `None` when no active resource has a sample.
fn least_loaded(active: &[Resource], snapshot: &MetricsSnapshot) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, resource) in active.iter().enumerate() {
        let Some(sample) = snapshot.get(&resource.id) else {
            continue;
        };
        if best.is_none_or(|(_, cpu)| sample.cpu_percent <= cpu) {
            best = Some((index, sample.cpu_percent));
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edos_core::{MetricSample, ResourceUsage};

    fn resource(n: u16) -> Resource {
        Resource::new(format!("w-{n}"), Endpoint::http("127.0.0.1", 9000 + n))
    }

    fn snapshot(entries: &[(u16, f64)]) -> MetricsSnapshot {
        entries
            .iter()
            .map(|&(n, cpu)| {
                let id = ResourceId::new(format!("w-{n}"));
                let usage = ResourceUsage {
                    cpu_percent: cpu,
                    mem_bytes: 0,
                };
                (id.clone(), MetricSample::new(id, usage))
            })
            .collect()
    }

    #[test]
    fn least_loaded_picks_lowest_cpu() {
        let active = vec![resource(1), resource(2), resource(3)];
        let snap = snapshot(&[(1, 40.0), (2, 5.0), (3, 20.0)]);
        assert_eq!(least_loaded(&active, &snap), Some(1));
    }

    #[test]
    fn least_loaded_ties_prefer_newest() {
        let active = vec![resource(1), resource(2), resource(3)];
        let snap = snapshot(&[(1, 10.0), (2, 30.0), (3, 10.0)]);
        assert_eq!(least_loaded(&active, &snap), Some(2));
    }

    #[test]
    fn least_loaded_skips_unsampled_and_handles_empty() {
        let active = vec![resource(1), resource(2)];
        assert_eq!(least_loaded(&active, &snapshot(&[])), None);
        assert_eq!(least_loaded(&active, &snapshot(&[(1, 50.0)])), Some(0));
    }

    #[test]
    fn membership_ignores_order() {
        let a = Endpoint::http("h", 1);
        let b = Endpoint::http("h", 2);
        let c = Endpoint::http("h", 3);
        assert!(same_members(
            &[a.clone(), b.clone()],
            &[b.clone(), a.clone()]
        ));
        assert!(!same_members(&[a.clone(), b.clone()], &[a, b, c]));
    }
}
