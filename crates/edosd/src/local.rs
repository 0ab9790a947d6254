//! In-process worker backend.
//!
//! Every resource is an axum server on `127.0.0.1:<ephemeral>` that burns a
//! fixed slice of CPU per `GET /`, one request at a time. Utilization is
//! derived from the busy time the handlers accumulate, so the backend is
//! both the `ResourceManager` and the `MetricsSource` for a local run.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::routing::get;
use tokio::sync::{Mutex, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use edos_core::{
    BoxFuture, Endpoint, MetricsSource, Resource, ResourceError, ResourceId, ResourceManager,
    ResourceUsage, SampleError,
};

/// Work and memory model for local workers.
#[derive(Debug, Clone, Copy)]
pub struct LocalSettings {
    /// CPU time burned per `GET /`.
    pub work_per_request: Duration,
    pub base_mem_bytes: u64,
    /// Added to the reported memory for every request in flight.
    pub mem_per_request_bytes: u64,
    /// Bound on graceful server shutdown in `stop`.
    pub stop_timeout: Duration,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            work_per_request: Duration::from_millis(20),
            base_mem_bytes: 32 * 1024 * 1024,
            mem_per_request_bytes: 256 * 1024,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters shared between a worker's handlers and the sampler.
struct WorkerLoad {
    id: ResourceId,
    work: Duration,
    busy_nanos: AtomicU64,
    in_flight: AtomicU64,
    /// The worker serves one request at a time.
    gate: Semaphore,
}

struct LocalWorker {
    addr: SocketAddr,
    load: Arc<WorkerLoad>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    /// Wall clock and busy total at the previous sample.
    last_sample: (Instant, u64),
}

/// Runs workers as in-process HTTP servers.
pub struct LocalBackend {
    settings: LocalSettings,
    next_id: AtomicU64,
    workers: Mutex<HashMap<ResourceId, LocalWorker>>,
}

impl LocalBackend {
    pub fn new(settings: LocalSettings) -> Self {
        Self {
            settings,
            next_id: AtomicU64::new(1),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    async fn start_worker(&self) -> Result<Resource, ResourceError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = ResourceId::new(format!("local-{n}"));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| ResourceError::Start(format!("bind failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ResourceError::Start(format!("no local address: {e}")))?;

        let load = Arc::new(WorkerLoad {
            id: id.clone(),
            work: self.settings.work_per_request,
            busy_nanos: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            gate: Semaphore::new(1),
        });

        let router = Router::new()
            .route("/", get(handle_work))
            .route("/health", get(|| async { "ok" }))
            .with_state(load.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_id = id.clone();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!(resource_id = %server_id, error = %e, "local worker server failed");
            }
        });

        let resource = Resource::new(id.clone(), Endpoint::http("127.0.0.1", addr.port()));
        self.workers.lock().await.insert(
            id,
            LocalWorker {
                addr,
                load,
                shutdown_tx,
                handle,
                last_sample: (Instant::now(), 0),
            },
        );

        info!(resource_id = %resource.id, %addr, "local worker started");
        Ok(resource)
    }

    async fn stop_worker(&self, resource: &Resource) -> Result<(), ResourceError> {
        let Some(worker) = self.workers.lock().await.remove(&resource.id) else {
            return Err(ResourceError::Stop {
                id: resource.id.clone(),
                reason: "unknown resource".to_string(),
            });
        };

        let _ = worker.shutdown_tx.send(());
        let mut handle = worker.handle;
        if tokio::time::timeout(self.settings.stop_timeout, &mut handle)
            .await
            .is_err()
        {
            // In-flight requests held the graceful shutdown open. Aborting
            // drops the listener, so the worker takes no new requests.
            handle.abort();
            let _ = handle.await;
            warn!(
                resource_id = %resource.id,
                addr = %worker.addr,
                timeout_ms = self.settings.stop_timeout.as_millis() as u64,
                "graceful shutdown timed out, local worker aborted"
            );
            return Ok(());
        }

        info!(resource_id = %resource.id, addr = %worker.addr, "local worker stopped");
        Ok(())
    }

    async fn sample_worker(&self, id: &ResourceId) -> Result<ResourceUsage, SampleError> {
        let mut workers = self.workers.lock().await;
        let worker = workers
            .get_mut(id)
            .ok_or_else(|| SampleError::NotFound(id.clone()))?;

        let now = Instant::now();
        let busy = worker.load.busy_nanos.load(Ordering::Relaxed);
        let (then, busy_then) = worker.last_sample;
        worker.last_sample = (now, busy);

        let wall = now.duration_since(then).as_nanos() as f64;
        let cpu_percent = if wall > 0.0 {
            busy.saturating_sub(busy_then) as f64 / wall * 100.0
        } else {
            0.0
        };
        let in_flight = worker.load.in_flight.load(Ordering::Relaxed);

        Ok(ResourceUsage {
            cpu_percent,
            mem_bytes: self.settings.base_mem_bytes + in_flight * self.settings.mem_per_request_bytes,
        })
    }
}

impl ResourceManager for LocalBackend {
    fn start(&self) -> BoxFuture<'_, Result<Resource, ResourceError>> {
        Box::pin(self.start_worker())
    }

    fn stop<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, Result<(), ResourceError>> {
        Box::pin(self.stop_worker(resource))
    }
}

impl MetricsSource for LocalBackend {
    fn sample<'a>(&'a self, id: &'a ResourceId) -> BoxFuture<'a, Result<ResourceUsage, SampleError>> {
        Box::pin(self.sample_worker(id))
    }
}

async fn handle_work(State(load): State<Arc<WorkerLoad>>) -> String {
    load.in_flight.fetch_add(1, Ordering::Relaxed);

    let busy = match load.gate.acquire().await {
        Ok(_permit) => {
            let work = load.work;
            tokio::task::spawn_blocking(move || burn(work))
                .await
                .unwrap_or_default()
        }
        Err(_) => Duration::ZERO,
    };

    load.busy_nanos
        .fetch_add(busy.as_nanos() as u64, Ordering::Relaxed);
    load.in_flight.fetch_sub(1, Ordering::Relaxed);

    debug!(resource_id = %load.id, busy_us = busy.as_micros() as u64, "request served");
    format!("Hello from {}! Processed in {:.4}s", load.id, busy.as_secs_f64())
}

/// Spin for `work` of wall time on the current thread.
fn burn(work: Duration) -> Duration {
    let started = Instant::now();
    let mut x = 123.456_f64;
    while started.elapsed() < work {
        for _ in 0..1_000 {
            x = std::hint::black_box(x.sqrt() * x.sin() + 123.456);
        }
    }
    started.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use edos_loadgen::{HttpRequestSender, RequestOutcome, RequestSender};

    fn backend(work_ms: u64) -> LocalBackend {
        LocalBackend::new(LocalSettings {
            work_per_request: Duration::from_millis(work_ms),
            stop_timeout: Duration::from_secs(2),
            ..LocalSettings::default()
        })
    }

    #[tokio::test]
    async fn started_worker_serves_requests() {
        let backend = backend(1);
        let resource = backend.start().await.unwrap();
        assert_eq!(resource.endpoint.host, "127.0.0.1");
        assert_ne!(resource.endpoint.port, 0);

        let sender = HttpRequestSender::new("/", Duration::from_secs(2));
        assert_eq!(
            sender.send(&resource.endpoint).await,
            RequestOutcome::Success(200)
        );

        let health = HttpRequestSender::new("/health", Duration::from_secs(2));
        assert!(health.send(&resource.endpoint).await.is_success());

        backend.stop(&resource).await.unwrap();
    }

    #[tokio::test]
    async fn busy_worker_reports_cpu() {
        let backend = backend(20);
        let resource = backend.start().await.unwrap();

        // Reset the sampling window, then keep the worker busy.
        backend.sample(&resource.id).await.unwrap();
        let sender = HttpRequestSender::new("/", Duration::from_secs(2));
        for _ in 0..5 {
            sender.send(&resource.endpoint).await;
        }
        let usage = backend.sample(&resource.id).await.unwrap();
        assert!(usage.cpu_percent > 20.0, "cpu {}", usage.cpu_percent);
        assert_eq!(usage.mem_bytes, LocalSettings::default().base_mem_bytes);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let idle = backend.sample(&resource.id).await.unwrap();
        assert!(idle.cpu_percent < 5.0, "idle cpu {}", idle.cpu_percent);

        backend.stop(&resource).await.unwrap();
    }

    #[tokio::test]
    async fn stopped_worker_is_not_found() {
        let backend = backend(1);
        let resource = backend.start().await.unwrap();
        backend.stop(&resource).await.unwrap();

        assert_eq!(backend.worker_count().await, 0);
        assert!(matches!(
            backend.sample(&resource.id).await,
            Err(SampleError::NotFound(_))
        ));
        assert!(matches!(
            backend.stop(&resource).await,
            Err(ResourceError::Stop { .. })
        ));

        let sender = HttpRequestSender::new("/", Duration::from_millis(500));
        assert_eq!(sender.send(&resource.endpoint).await, RequestOutcome::Failed);
    }

    #[tokio::test]
    async fn stop_timeout_aborts_busy_worker() {
        let backend = LocalBackend::new(LocalSettings {
            work_per_request: Duration::from_millis(800),
            stop_timeout: Duration::from_millis(50),
            ..LocalSettings::default()
        });
        let resource = backend.start().await.unwrap();

        let endpoint = resource.endpoint.clone();
        let _in_flight = tokio::spawn(async move {
            HttpRequestSender::new("/", Duration::from_secs(5))
                .send(&endpoint)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        backend.stop(&resource).await.unwrap();
        assert_eq!(backend.worker_count().await, 0);
        assert!(matches!(
            backend.sample(&resource.id).await,
            Err(SampleError::NotFound(_))
        ));

        let sender = HttpRequestSender::new("/", Duration::from_millis(500));
        assert_eq!(sender.send(&resource.endpoint).await, RequestOutcome::Failed);
    }

    #[tokio::test]
    async fn workers_get_distinct_ids_and_ports() {
        let backend = backend(1);
        let a = backend.start().await.unwrap();
        let b = backend.start().await.unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.endpoint.port, b.endpoint.port);
        assert_eq!(backend.worker_count().await, 2);

        backend.stop(&b).await.unwrap();
        backend.stop(&a).await.unwrap();
    }

    #[test]
    fn burn_spins_for_requested_time() {
        let spent = burn(Duration::from_millis(5));
        assert!(spent >= Duration::from_millis(5));
    }
}
