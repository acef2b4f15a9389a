use crate::call::{CallContext, Finalizer, Interceptor, PoolStats, StatePool, StatsHandler};
use crate::clock::MonotonicClock;
use crate::config::{default_config, LoadBalancingPolicy, TelemetryConfig};
use crate::conn::{ConnInfo, ConnRegistry, TrackedConn, TransportConn};
use crate::diag::{diag_channel, DiagHandle, PeriodicSampler, Sampler, SchedulerStats, WorkerStats};
use crate::error::{Result, TelemetryError};
use crate::metrics::{MetricSink, MetricsRecorder, OtelSink};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything one instrumented client needs: call hooks, the connection
/// registry and the background diagnostics tasks.
///
/// Background tasks stop when [`close`](Self::close) or
/// [`shutdown`](Self::shutdown) is called, or when this value is dropped.
#[derive(Debug)]
pub struct Instrumentation {
	config: TelemetryConfig,
	pool: Arc<StatePool>,
	recorder: Arc<MetricsRecorder>,
	interceptor: Interceptor,
	registry: ConnRegistry,
	diag: DiagHandle,
	shutdown_token: CancellationToken,
	tasks: Mutex<Option<BackgroundTasks>>,
}

#[derive(Debug)]
struct BackgroundTasks {
	worker: JoinHandle<WorkerStats>,
	scheduler: Option<JoinHandle<SchedulerStats>>,
}

/// Final counters of the background tasks, empty if they were already collected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
	pub worker: Option<WorkerStats>,
	pub scheduler: Option<SchedulerStats>,
}

impl Instrumentation {
	/// Record into the process-wide OpenTelemetry meter provider.
	pub fn new(config: TelemetryConfig) -> Result<Self> {
		config.validate()?;
		let sink = Arc::new(OtelSink::global(&config.metric_prefix));
		Self::with_sink(config, sink)
	}

	/// Build with the configuration set through [`set_default_config`](crate::set_default_config).
	pub fn with_default_config() -> Result<Self> {
		Self::new(default_config())
	}

	/// Must be called inside a tokio runtime; the diagnostics tasks are spawned here.
	pub fn with_sink(config: TelemetryConfig, sink: Arc<dyn MetricSink>) -> Result<Self> {
		config.validate()?;
		Handle::try_current().map_err(|_| TelemetryError::NoRuntime)?;

		let clock = MonotonicClock::new();
		let recorder = Arc::new(MetricsRecorder::new(sink, config.attr_cache_ceiling));
		let finalizer = Arc::new(Finalizer::new(clock, Arc::clone(&recorder)));
		let handler = Arc::new(StatsHandler::new(clock, Arc::clone(&finalizer)));
		let pool = StatePool::new(config.pool_max_idle);
		let interceptor = Interceptor::new(clock, Arc::clone(&pool), handler, finalizer);

		let registry = ConnRegistry::new();
		let shutdown_token = CancellationToken::new();

		let sampler = Sampler::new(registry.clone(), Arc::clone(&recorder), &config.sampling);
		let (diag, worker) = diag_channel(sampler, config.sampling.queue_capacity, shutdown_token.child_token());
		let worker = worker.start();
		let scheduler = PeriodicSampler::new(registry.clone(), diag.clone(), config.tcp_metrics_interval, shutdown_token.child_token()).start();

		info!(
			metric_prefix = %config.metric_prefix,
			load_balancing = ?config.load_balancing(),
			tcp_interval_secs = config.tcp_metrics_interval.as_secs(),
			"rpc instrumentation started"
		);

		Ok(Self {
			config,
			pool,
			recorder,
			interceptor,
			registry,
			diag,
			shutdown_token,
			tasks: Mutex::new(Some(BackgroundTasks { worker, scheduler })),
		})
	}

	pub const fn config(&self) -> &TelemetryConfig {
		&self.config
	}

	pub const fn load_balancing(&self) -> LoadBalancingPolicy {
		self.config.load_balancing()
	}

	pub const fn interceptor(&self) -> &Interceptor {
		&self.interceptor
	}

	pub const fn registry(&self) -> &ConnRegistry {
		&self.registry
	}

	pub const fn diagnostics(&self) -> &DiagHandle {
		&self.diag
	}

	pub fn pool_stats(&self) -> PoolStats {
		self.pool.stats()
	}

	pub fn cached_label_sets(&self) -> usize {
		self.recorder.cached_label_sets()
	}

	/// See [`Interceptor::unary`].
	pub async fn unary<F, Fut, T, E>(&self, method: &str, invoker: F) -> std::result::Result<T, E>
	where
		F: FnOnce(CallContext) -> Fut,
		Fut: Future<Output = std::result::Result<T, E>>,
	{
		self.interceptor.unary(method, invoker).await
	}

	/// See [`Interceptor::streaming`].
	pub async fn streaming<F, Fut, S, E>(&self, method: &str, streamer: F) -> std::result::Result<S, E>
	where
		F: FnOnce(CallContext) -> Fut,
		Fut: Future<Output = std::result::Result<S, E>>,
	{
		self.interceptor.streaming(method, streamer).await
	}

	/// Open a TCP connection and register it for diagnostics.
	pub async fn dial(&self, addr: &str) -> Result<TrackedConn<TcpStream>> {
		let stream = TcpStream::connect(addr).await.map_err(|source| TelemetryError::Dial {
			addr: addr.to_owned(),
			source,
		})?;
		Ok(self.registry.wrap_conn(stream))
	}

	/// Register an already-established connection.
	pub fn wrap_conn<C: TransportConn>(&self, conn: C) -> TrackedConn<C> {
		self.registry.wrap_conn(conn)
	}

	/// Queue one connection for an out-of-band sample; still subject to rate limit and cooldown.
	pub fn request_sample(&self, info: &ConnInfo) -> bool {
		self.diag.enqueue_conn(info)
	}

	/// Signal the background tasks to stop. Returns false if already closed.
	pub fn close(&self) -> bool {
		if self.shutdown_token.is_cancelled() {
			return false;
		}
		self.shutdown_token.cancel();
		info!(live_conns = self.registry.len(), "rpc instrumentation closing");
		true
	}

	pub fn is_closed(&self) -> bool {
		self.shutdown_token.is_cancelled()
	}

	/// Close and wait for the background tasks to finish.
	pub async fn shutdown(&self) -> ShutdownReport {
		self.close();

		let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner).take();
		let Some(tasks) = tasks else {
			debug!("background tasks already collected");
			return ShutdownReport::default();
		};

		let worker = tasks.worker.await.map_err(|e| warn!(error = %e, "diagnostics worker join failed")).ok();
		let scheduler = match tasks.scheduler {
			Some(join) => join.await.map_err(|e| warn!(error = %e, "periodic sampler join failed")).ok(),
			None => None,
		};

		ShutdownReport { worker, scheduler }
	}
}

impl Drop for Instrumentation {
	fn drop(&mut self) {
		self.shutdown_token.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metrics::testing::CaptureSink;
	use std::time::Duration;

	fn sink() -> Arc<dyn MetricSink> {
		Arc::new(CaptureSink::default())
	}

	#[test]
	fn test_requires_runtime() {
		let result = Instrumentation::with_sink(TelemetryConfig::default(), sink());
		assert!(matches!(result, Err(TelemetryError::NoRuntime)));
	}

	#[tokio::test]
	async fn test_invalid_config_is_rejected() {
		let config = TelemetryConfig {
			metric_prefix: "  ".to_string(),
			..TelemetryConfig::default()
		};
		assert!(matches!(Instrumentation::with_sink(config, sink()), Err(TelemetryError::InvalidConfig(_))));
	}

	#[tokio::test]
	async fn test_shutdown_collects_tasks_once() {
		let inst = Instrumentation::with_sink(TelemetryConfig::default(), sink()).unwrap();

		let report = inst.shutdown().await;
		assert!(report.worker.is_some());
		assert!(report.scheduler.is_some());
		assert!(inst.is_closed());

		assert_eq!(inst.shutdown().await, ShutdownReport::default());
		assert!(!inst.close());
	}

	#[tokio::test]
	async fn test_zero_interval_runs_worker_only() {
		let config = TelemetryConfig {
			tcp_metrics_interval: Duration::ZERO,
			..TelemetryConfig::default()
		};
		let inst = Instrumentation::with_sink(config, sink()).unwrap();

		let report = inst.shutdown().await;
		assert!(report.worker.is_some());
		assert!(report.scheduler.is_none());
	}

	#[tokio::test]
	async fn test_load_balancing_follows_config() {
		let config = TelemetryConfig {
			enable_client_side_lb: true,
			..TelemetryConfig::default()
		};
		let inst = Instrumentation::with_sink(config, sink()).unwrap();
		assert_eq!(inst.load_balancing(), LoadBalancingPolicy::RoundRobin);
		assert!(inst.load_balancing().service_config().is_some());
	}
}
