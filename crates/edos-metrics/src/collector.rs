//! Metrics collector — polls tracked resources into a shared cache.
//!
//! The cache and the tracked-id set sit behind one mutex that is never
//! held across a sample, so readers only ever wait for a map copy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use edos_core::{MetricSample, MetricsSource, ResourceId, SampleError};

/// Latest sample per tracked resource.
pub type MetricsSnapshot = HashMap<ResourceId, MetricSample>;

/// Pool-wide averages derived from one snapshot.
///
/// An empty value means "no data yet", not "zero load".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Averages {
    pub avg_cpu_percent: f64,
    pub avg_mem_bytes: f64,
    /// Ids that contributed, sorted.
    pub resource_ids: Vec<ResourceId>,
}

impl Averages {
    pub fn from_snapshot(snapshot: &MetricsSnapshot) -> Self {
        if snapshot.is_empty() {
            return Self::default();
        }

        let n = snapshot.len() as f64;
        let cpu: f64 = snapshot.values().map(|s| s.cpu_percent).sum();
        let mem: f64 = snapshot.values().map(|s| s.mem_bytes as f64).sum();

        let mut resource_ids: Vec<ResourceId> = snapshot.keys().cloned().collect();
        resource_ids.sort();

        Self {
            avg_cpu_percent: cpu / n,
            avg_mem_bytes: mem / n,
            resource_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resource_ids.is_empty()
    }
}

/// Outcome of one polling sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub sampled: usize,
    pub evicted: usize,
}

#[derive(Default)]
struct CacheState {
    tracked: HashSet<ResourceId>,
    samples: MetricsSnapshot,
}

/// Shared utilization cache plus the poll loop that fills it.
#[derive(Clone)]
pub struct MetricsCollector {
    source: Arc<dyn MetricsSource>,
    cache: Arc<Mutex<CacheState>>,
    interval: Duration,
    sample_timeout: Duration,
}

impl MetricsCollector {
    /// Create a collector polling `source` every `interval`.
    pub fn new(source: Arc<dyn MetricsSource>, interval: Duration) -> Self {
        Self {
            source,
            cache: Arc::new(Mutex::new(CacheState::default())),
            interval,
            sample_timeout: Duration::from_secs(2),
        }
    }

    /// Bound a single sample call; a slow resource is evicted, not waited on.
    pub fn with_sample_timeout(mut self, timeout: Duration) -> Self {
        self.sample_timeout = timeout;
        self
    }

    /// Replace the tracked set and evict samples for ids no longer in it.
    ///
    /// Idempotent; the control loop calls it every tick.
    pub async fn update_tracked<I>(&self, ids: I)
    where
        I: IntoIterator<Item = ResourceId>,
    {
        let tracked: HashSet<ResourceId> = ids.into_iter().collect();
        let mut cache = self.cache.lock().await;
        let before = cache.samples.len();
        cache.samples.retain(|id, _| tracked.contains(id));
        let pruned = before - cache.samples.len();
        cache.tracked = tracked;

        if pruned > 0 {
            debug!(pruned, tracked = cache.tracked.len(), "evicted untracked samples");
        }
    }

    /// Currently tracked ids, sorted.
    pub async fn tracked(&self) -> Vec<ResourceId> {
        let cache = self.cache.lock().await;
        let mut ids: Vec<ResourceId> = cache.tracked.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Copy of the cache. Never waits on a `MetricsSource`.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.cache.lock().await.samples.clone()
    }

    pub async fn averages(&self) -> Averages {
        Averages::from_snapshot(&self.snapshot().await)
    }

    /// Sample every tracked id once.
    ///
    /// Ids are copied out first so the lock is released while sampling.
    /// Samples run concurrently, so one slow resource costs at most one
    /// `sample_timeout` per poll for everyone. A result is only cached if
    /// its id is still tracked when it arrives.
    pub async fn poll_once(&self) -> PollStats {
        let ids: Vec<ResourceId> = {
            let cache = self.cache.lock().await;
            cache.tracked.iter().cloned().collect()
        };

        let mut samples = JoinSet::new();
        for id in ids {
            let source = self.source.clone();
            let timeout = self.sample_timeout;
            samples.spawn(async move {
                let result = match tokio::time::timeout(timeout, source.sample(&id)).await {
                    Ok(result) => result,
                    Err(_) => Err(SampleError::Timeout(id.clone())),
                };
                (id, result)
            });
        }

        let mut stats = PollStats::default();
        while let Some(joined) = samples.join_next().await {
            let (id, result) = match joined {
                Ok(sampled) => sampled,
                Err(e) => {
                    warn!(error = %e, "metrics sample task failed");
                    continue;
                }
            };

            match result {
                Ok(usage) => {
                    let mut cache = self.cache.lock().await;
                    if cache.tracked.contains(&id) {
                        cache
                            .samples
                            .insert(id.clone(), MetricSample::new(id, usage));
                        stats.sampled += 1;
                    }
                }
                Err(e) => {
                    match &e {
                        SampleError::NotFound(_) => {
                            debug!(resource_id = %id, "resource gone, evicting sample")
                        }
                        _ => warn!(
                            resource_id = %id,
                            operation = "sample",
                            error = %e,
                            "metrics sample failed, evicting"
                        ),
                    }
                    let mut cache = self.cache.lock().await;
                    if cache.samples.remove(&id).is_some() {
                        stats.evicted += 1;
                    }
                }
            }
        }
        stats
    }

    /// Run the poll loop until shutdown.
    ///
    /// Polls immediately, then once per interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            "metrics collector started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let stats = self.poll_once().await;
            if stats.evicted > 0 {
                debug!(sampled = stats.sampled, evicted = stats.evicted, "poll complete");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("metrics collector shutting down");
    }

    /// Spawn `run` on the tokio runtime.
    pub fn spawn(&self) -> MetricsPoller {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let collector = self.clone();
        let handle = tokio::spawn(async move {
            collector.run(shutdown_rx).await;
        });
        MetricsPoller {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle to a spawned poll loop.
pub struct MetricsPoller {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MetricsPoller {
    /// Signal the poll loop and wait up to `timeout` for it to exit.
    pub async fn stop(self, timeout: Duration) {
        let _ = self.shutdown_tx.send(true);
        let mut handle = self.handle;
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                "metrics poller did not stop in time, aborting"
            );
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edos_core::{BoxFuture, ResourceUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Clone)]
    enum Behavior {
        Usage(f64, u64),
        NotFound,
        Fail,
        Hang,
        Gated(Arc<Notify>, f64),
    }

    #[derive(Default)]
    struct MockSource {
        behaviors: std::sync::Mutex<HashMap<ResourceId, Behavior>>,
        calls: AtomicUsize,
    }

    impl MockSource {
        fn set(&self, id: &str, behavior: Behavior) {
            self.behaviors
                .lock()
                .unwrap()
                .insert(ResourceId::from(id), behavior);
        }
    }

    impl MetricsSource for MockSource {
        fn sample<'a>(
            &'a self,
            id: &'a ResourceId,
        ) -> BoxFuture<'a, Result<ResourceUsage, SampleError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let behavior = self.behaviors.lock().unwrap().get(id).cloned();
            Box::pin(async move {
                match behavior {
                    Some(Behavior::Usage(cpu, mem)) => Ok(ResourceUsage {
                        cpu_percent: cpu,
                        mem_bytes: mem,
                    }),
                    Some(Behavior::Fail) => Err(SampleError::Failed {
                        id: id.clone(),
                        reason: "boom".to_string(),
                    }),
                    Some(Behavior::Hang) => std::future::pending().await,
                    Some(Behavior::Gated(gate, cpu)) => {
                        gate.notified().await;
                        Ok(ResourceUsage {
                            cpu_percent: cpu,
                            mem_bytes: 0,
                        })
                    }
                    Some(Behavior::NotFound) | None => Err(SampleError::NotFound(id.clone())),
                }
            })
        }
    }

    fn ids(names: &[&str]) -> Vec<ResourceId> {
        names.iter().map(|n| ResourceId::from(*n)).collect()
    }

    fn collector(source: Arc<MockSource>) -> MetricsCollector {
        MetricsCollector::new(source, Duration::from_millis(20))
            .with_sample_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn averages_empty_before_any_sample() {
        let source = Arc::new(MockSource::default());
        source.set("a", Behavior::Usage(50.0, 100));
        let collector = collector(source);
        collector.update_tracked(ids(&["a"])).await;

        let avg = collector.averages().await;
        assert!(avg.is_empty());
        assert_eq!(avg.avg_cpu_percent, 0.0);
        assert_eq!(avg.avg_mem_bytes, 0.0);
        assert!(collector.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn poll_once_averages_tracked_samples() {
        let source = Arc::new(MockSource::default());
        source.set("a", Behavior::Usage(40.0, 100));
        source.set("b", Behavior::Usage(80.0, 300));
        let collector = collector(source);
        collector.update_tracked(ids(&["b", "a"])).await;

        let stats = collector.poll_once().await;
        assert_eq!(stats.sampled, 2);

        let avg = collector.averages().await;
        assert_eq!(avg.avg_cpu_percent, 60.0);
        assert_eq!(avg.avg_mem_bytes, 200.0);
        assert_eq!(avg.resource_ids, ids(&["a", "b"]));
    }

    #[tokio::test]
    async fn update_tracked_evicts_removed_ids() {
        let source = Arc::new(MockSource::default());
        source.set("a", Behavior::Usage(10.0, 1));
        source.set("b", Behavior::Usage(90.0, 1));
        let collector = collector(source);
        collector.update_tracked(ids(&["a", "b"])).await;
        collector.poll_once().await;

        collector.update_tracked(ids(&["a"])).await;
        let avg = collector.averages().await;
        assert_eq!(avg.resource_ids, ids(&["a"]));
        assert_eq!(avg.avg_cpu_percent, 10.0);

        // Idempotent.
        collector.update_tracked(ids(&["a"])).await;
        assert_eq!(collector.snapshot().await.len(), 1);
        assert_eq!(collector.tracked().await, ids(&["a"]));
    }

    #[tokio::test]
    async fn not_found_evicts_cached_sample() {
        let source = Arc::new(MockSource::default());
        source.set("a", Behavior::Usage(30.0, 1));
        let collector = collector(source.clone());
        collector.update_tracked(ids(&["a"])).await;
        collector.poll_once().await;
        assert_eq!(collector.snapshot().await.len(), 1);

        source.set("a", Behavior::NotFound);
        let stats = collector.poll_once().await;
        assert_eq!(stats.evicted, 1);
        assert!(collector.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn failing_resource_does_not_stall_others() {
        let source = Arc::new(MockSource::default());
        source.set("a", Behavior::Hang);
        source.set("b", Behavior::Fail);
        source.set("c", Behavior::Usage(70.0, 5));
        let collector = collector(source.clone());
        collector.update_tracked(ids(&["a", "b", "c"])).await;

        let stats = collector.poll_once().await;
        assert_eq!(stats.sampled, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        let avg = collector.averages().await;
        assert_eq!(avg.resource_ids, ids(&["c"]));
        assert_eq!(avg.avg_cpu_percent, 70.0);
    }

    #[tokio::test]
    async fn hanging_resources_time_out_together() {
        let source = Arc::new(MockSource::default());
        for id in ["h1", "h2", "h3", "h4"] {
            source.set(id, Behavior::Hang);
        }
        source.set("ok", Behavior::Usage(55.0, 8));
        let collector = collector(source).with_sample_timeout(Duration::from_millis(200));
        collector
            .update_tracked(ids(&["h1", "h2", "h3", "h4", "ok"]))
            .await;

        let started = std::time::Instant::now();
        let stats = collector.poll_once().await;
        let elapsed = started.elapsed();

        assert_eq!(stats.sampled, 1);
        assert!(elapsed < Duration::from_millis(600), "poll took {elapsed:?}");
        assert_eq!(collector.averages().await.resource_ids, ids(&["ok"]));
    }

    #[tokio::test]
    async fn in_flight_sample_for_untracked_id_is_dropped() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(MockSource::default());
        source.set("a", Behavior::Gated(gate.clone(), 99.0));
        let collector = collector(source).with_sample_timeout(Duration::from_secs(5));
        collector.update_tracked(ids(&["a"])).await;

        let poller = collector.clone();
        let poll = tokio::spawn(async move { poller.poll_once().await });

        // Let the sample start, then untrack before it resolves.
        tokio::time::sleep(Duration::from_millis(20)).await;
        collector.update_tracked(Vec::new()).await;
        gate.notify_one();

        let stats = poll.await.unwrap();
        assert_eq!(stats.sampled, 0);
        assert!(collector.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn spawned_poller_fills_cache_and_stops() {
        let source = Arc::new(MockSource::default());
        source.set("a", Behavior::Usage(12.5, 64));
        let collector = collector(source.clone());
        collector.update_tracked(ids(&["a"])).await;

        let poller = collector.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(collector.averages().await.avg_cpu_percent, 12.5);
        assert!(source.calls.load(Ordering::SeqCst) >= 2);

        poller.stop(Duration::from_secs(1)).await;
        let calls = source.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }
}
