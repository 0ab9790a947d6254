//! Load generator pool with synchronous stop and restart.
//!
//! Each `start()` opens a new generation: fresh workers and a fresh stop
//! channel. `stop()` signals the generation and joins every worker under a
//! shared deadline, so on return no worker of the old generation will
//! issue another request. Statistics accumulate across generations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use edos_core::Endpoint;

use crate::error::LoadGenError;
use crate::sender::RequestSender;
use crate::stats::{LoadReport, LoadStats};
use crate::worker::{WorkerSummary, WorkerTask};

struct Generation {
    id: u64,
    targets: Vec<Endpoint>,
    assignments: Vec<Endpoint>,
    rate: f64,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<WorkerSummary>>,
}

#[derive(Default)]
struct Inner {
    generations: u64,
    running: Option<Generation>,
}

/// A set of paced workers sending synthetic requests to fixed targets.
pub struct LoadGeneratorPool {
    name: String,
    sender: Arc<dyn RequestSender>,
    join_timeout: Duration,
    stats: Arc<LoadStats>,
    inner: Mutex<Inner>,
}

impl LoadGeneratorPool {
    /// `join_timeout` bounds how long `stop()` waits for in-flight requests
    /// before abandoning the remaining workers.
    pub fn new(
        name: impl Into<String>,
        sender: Arc<dyn RequestSender>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            sender,
            join_timeout,
            stats: Arc::new(LoadStats::new()),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launch `worker_count` workers at `rate` requests/second each.
    ///
    /// Worker `i` targets `targets[i % targets.len()]`.
    pub async fn start(
        &self,
        targets: &[Endpoint],
        rate: f64,
        worker_count: usize,
    ) -> Result<(), LoadGenError> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner, targets, rate, worker_count)
    }

    /// Signal every worker and wait for all of them to exit.
    ///
    /// No-op when idle. Workers still busy at the join deadline are aborted
    /// and reported at warn.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
    }

    /// `stop()` then `start()` without releasing the lock in between.
    pub async fn restart(
        &self,
        targets: &[Endpoint],
        rate: f64,
        worker_count: usize,
    ) -> Result<(), LoadGenError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
        self.start_locked(&mut inner, targets, rate, worker_count)
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running.is_some()
    }

    /// Targets of the running generation, in the order given to `start`.
    pub async fn targets(&self) -> Vec<Endpoint> {
        self.inner
            .lock()
            .await
            .running
            .as_ref()
            .map(|g| g.targets.clone())
            .unwrap_or_default()
    }

    /// Per-worker target of the running generation.
    pub async fn assignments(&self) -> Vec<Endpoint> {
        self.inner
            .lock()
            .await
            .running
            .as_ref()
            .map(|g| g.assignments.clone())
            .unwrap_or_default()
    }

    /// Cumulative statistics across every generation.
    pub async fn report(&self) -> LoadReport {
        self.stats.report().await
    }

    fn start_locked(
        &self,
        inner: &mut Inner,
        targets: &[Endpoint],
        rate: f64,
        worker_count: usize,
    ) -> Result<(), LoadGenError> {
        if inner.running.is_some() {
            return Err(LoadGenError::AlreadyRunning(self.name.clone()));
        }
        if targets.is_empty() {
            return Err(LoadGenError::NoTargets);
        }
        if !rate.is_finite() || rate <= 0.0 {
            return Err(LoadGenError::InvalidRate(rate));
        }
        if worker_count == 0 {
            return Err(LoadGenError::NoWorkers);
        }

        let interval = Duration::from_secs_f64(1.0 / rate);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let assignments: Vec<Endpoint> = (0..worker_count)
            .map(|i| targets[i % targets.len()].clone())
            .collect();

        let workers = assignments
            .iter()
            .enumerate()
            .map(|(index, endpoint)| {
                let task = WorkerTask {
                    pool: self.name.clone(),
                    index,
                    endpoint: endpoint.clone(),
                    interval,
                    sender: Arc::clone(&self.sender),
                    stats: Arc::clone(&self.stats),
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(task.run())
            })
            .collect();

        inner.generations += 1;
        info!(
            pool = %self.name,
            generation = inner.generations,
            targets = targets.len(),
            workers = worker_count,
            rate,
            "load generator started"
        );

        inner.running = Some(Generation {
            id: inner.generations,
            targets: targets.to_vec(),
            assignments,
            rate,
            shutdown_tx,
            workers,
        });
        Ok(())
    }

    async fn stop_locked(&self, inner: &mut Inner) {
        let Some(generation) = inner.running.take() else {
            return;
        };

        let _ = generation.shutdown_tx.send(true);
        let deadline = Instant::now() + self.join_timeout;

        let mut joined = 0usize;
        let mut abandoned = 0usize;
        let mut totals = WorkerSummary::default();

        for mut handle in generation.workers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(summary)) => {
                    joined += 1;
                    totals.requests += summary.requests;
                    totals.errors += summary.errors;
                }
                Ok(Err(e)) => {
                    warn!(pool = %self.name, error = %e, "load worker panicked");
                }
                Err(_) => {
                    handle.abort();
                    abandoned += 1;
                }
            }
        }

        if abandoned > 0 {
            warn!(
                pool = %self.name,
                generation = generation.id,
                abandoned,
                join_timeout_ms = self.join_timeout.as_millis() as u64,
                "load workers did not stop in time, aborted"
            );
        }

        debug!(
            pool = %self.name,
            generation = generation.id,
            rate = generation.rate,
            joined,
            requests = totals.requests,
            errors = totals.errors,
            "load generator stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edos_core::BoxFuture;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::sender::RequestOutcome;

    /// Counts requests per endpoint, optionally sleeping before answering.
    #[derive(Default)]
    struct CountingSender {
        delay: Duration,
        outcome: Option<RequestOutcome>,
        total: AtomicU64,
        per_target: StdMutex<HashMap<String, u64>>,
    }

    impl CountingSender {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn total(&self) -> u64 {
            self.total.load(Ordering::SeqCst)
        }

        fn hits(&self, endpoint: &Endpoint) -> u64 {
            self.per_target
                .lock()
                .unwrap()
                .get(&endpoint.to_string())
                .copied()
                .unwrap_or(0)
        }
    }

    impl RequestSender for CountingSender {
        fn send<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, RequestOutcome> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.total.fetch_add(1, Ordering::SeqCst);
                *self
                    .per_target
                    .lock()
                    .unwrap()
                    .entry(endpoint.to_string())
                    .or_default() += 1;
                self.outcome.unwrap_or(RequestOutcome::Success(200))
            })
        }
    }

    struct HangingSender;

    impl RequestSender for HangingSender {
        fn send<'a>(&'a self, _endpoint: &'a Endpoint) -> BoxFuture<'a, RequestOutcome> {
            Box::pin(std::future::pending())
        }
    }

    fn ep(port: u16) -> Endpoint {
        Endpoint::http("127.0.0.1", port)
    }

    fn pool(sender: Arc<dyn RequestSender>) -> LoadGeneratorPool {
        LoadGeneratorPool::new("test", sender, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn start_rejects_invalid_arguments() {
        let p = pool(Arc::new(CountingSender::default()));
        assert_eq!(p.start(&[], 1.0, 1).await, Err(LoadGenError::NoTargets));
        assert_eq!(
            p.start(&[ep(1)], 0.0, 1).await,
            Err(LoadGenError::InvalidRate(0.0))
        );
        assert!(matches!(
            p.start(&[ep(1)], f64::NAN, 1).await,
            Err(LoadGenError::InvalidRate(_))
        ));
        assert_eq!(p.start(&[ep(1)], 1.0, 0).await, Err(LoadGenError::NoWorkers));
        assert!(!p.is_running().await);
    }

    #[tokio::test]
    async fn second_start_is_already_running() {
        let p = pool(Arc::new(CountingSender::default()));
        p.start(&[ep(1)], 1.0, 1).await.unwrap();
        assert_eq!(
            p.start(&[ep(2)], 1.0, 1).await,
            Err(LoadGenError::AlreadyRunning("test".into()))
        );
        assert_eq!(p.targets().await, vec![ep(1)]);
        p.stop().await;
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let p = pool(Arc::new(CountingSender::default()));
        p.stop().await;
        p.stop().await;
        assert!(!p.is_running().await);
        assert!(p.targets().await.is_empty());
    }

    #[tokio::test]
    async fn assignments_are_round_robin() {
        let p = pool(Arc::new(CountingSender::default()));
        p.start(&[ep(1), ep(2)], 1.0, 5).await.unwrap();
        assert_eq!(
            p.assignments().await,
            vec![ep(1), ep(2), ep(1), ep(2), ep(1)]
        );
        p.stop().await;
    }

    #[tokio::test]
    async fn stop_then_start_succeeds_and_old_workers_cease() {
        let sender = Arc::new(CountingSender::default());
        let p = pool(sender.clone());

        p.start(&[ep(1)], 50.0, 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        p.stop().await;

        let after_stop = sender.hits(&ep(1));
        assert!(after_stop > 0);

        p.start(&[ep(2)], 50.0, 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        p.stop().await;

        assert_eq!(sender.hits(&ep(1)), after_stop);
        assert!(sender.hits(&ep(2)) > 0);
    }

    #[tokio::test]
    async fn restart_retargets_all_workers() {
        // Two targets, then three: 4 workers at 2 rps for 1.25 s.
        let sender = Arc::new(CountingSender::default());
        let p = pool(sender.clone());
        let (a, b, c) = (ep(1), ep(2), ep(3));

        p.start(&[a.clone(), b.clone()], 2.0, 4).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        p.restart(&[a.clone(), b.clone(), c.clone()], 2.0, 4)
            .await
            .unwrap();
        assert_eq!(
            p.assignments().await,
            vec![a.clone(), b.clone(), c.clone(), a.clone()]
        );

        let before = sender.total();
        tokio::time::sleep(Duration::from_millis(1250)).await;
        p.stop().await;

        let during = sender.total() - before;
        assert!((10..=14).contains(&during), "sent {during}");
        assert!(sender.hits(&c) > 0);
    }

    #[tokio::test]
    async fn slow_sender_does_not_burst() {
        // 100 ms requests against a 20 ms interval: at most one per 100 ms.
        let sender = Arc::new(CountingSender::with_delay(Duration::from_millis(100)));
        let p = pool(sender.clone());

        p.start(&[ep(1)], 50.0, 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(550)).await;
        p.stop().await;

        let sent = sender.total();
        assert!((4..=7).contains(&sent), "sent {sent}");
    }

    #[tokio::test]
    async fn hanging_sender_is_bounded_by_join_timeout() {
        let p = LoadGeneratorPool::new("hang", Arc::new(HangingSender), Duration::from_millis(100));
        p.start(&[ep(1)], 1.0, 3).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        p.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!p.is_running().await);
        p.start(&[ep(1)], 1.0, 1).await.unwrap();
        p.stop().await;
    }

    #[tokio::test]
    async fn errors_are_counted() {
        let sender = Arc::new(CountingSender {
            outcome: Some(RequestOutcome::Rejected(503)),
            ..Default::default()
        });
        let p = pool(sender);
        p.start(&[ep(1)], 20.0, 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        p.stop().await;

        let report = p.report().await;
        assert!(report.requests > 0);
        assert_eq!(report.errors, report.requests);
        assert_eq!(report.p50_rtt_ms, 0.0);
    }

    #[tokio::test]
    async fn pools_are_independent() {
        let sender = Arc::new(CountingSender::default());
        let attack = LoadGeneratorPool::new("attack", sender.clone(), Duration::from_secs(1));
        let baseline = LoadGeneratorPool::new("baseline", sender.clone(), Duration::from_secs(1));

        attack.start(&[ep(1)], 20.0, 1).await.unwrap();
        baseline.start(&[ep(2)], 20.0, 1).await.unwrap();
        attack.stop().await;

        assert!(!attack.is_running().await);
        assert!(baseline.is_running().await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        baseline.stop().await;

        assert!(baseline.report().await.requests > 0);
        assert_eq!(
            attack.report().await.requests + baseline.report().await.requests,
            sender.total()
        );
    }
}
