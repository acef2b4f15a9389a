use super::worker::DiagHandle;
use crate::conn::ConnRegistry;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Queues every live connection for sampling once per interval.
pub struct PeriodicSampler {
	registry: ConnRegistry,
	diag: DiagHandle,
	interval: Duration,
	shutdown_token: CancellationToken,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
	pub ticks: u64,
	pub enqueued: u64,
	pub dropped: u64,
}

impl PeriodicSampler {
	pub const fn new(registry: ConnRegistry, diag: DiagHandle, interval: Duration, shutdown_token: CancellationToken) -> Self {
		Self {
			registry,
			diag,
			interval,
			shutdown_token,
		}
	}

	/// A zero interval disables the sampler and nothing is spawned.
	pub fn start(self) -> Option<JoinHandle<SchedulerStats>> {
		if self.interval.is_zero() {
			debug!("periodic tcp sampling disabled");
			return None;
		}
		Some(tokio::spawn(async move { self.run().await }))
	}

	/// Enqueue one request per probed connection; returns `(enqueued, dropped)`.
	pub fn enqueue_all(&self) -> (u64, u64) {
		let mut enqueued = 0;
		let mut dropped = 0;
		for info in self.registry.snapshot() {
			if !info.has_probe() {
				continue;
			}
			if self.diag.enqueue_conn(&info) {
				enqueued += 1;
			} else {
				dropped += 1;
			}
		}
		(enqueued, dropped)
	}

	async fn run(self) -> SchedulerStats {
		let mut stats = SchedulerStats::default();
		let Some(first_tick) = Instant::now().checked_add(self.interval) else {
			warn!(interval_secs = self.interval.as_secs_f64(), "tcp sampling interval out of range, periodic sampling never ticks");
			self.shutdown_token.cancelled().await;
			return stats;
		};
		let mut ticker = interval_at(first_tick, self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

		info!(interval_secs = self.interval.as_secs_f64(), "periodic tcp sampling started");

		loop {
			tokio::select! {
				biased;
				() = self.shutdown_token.cancelled() => break,
				_ = ticker.tick() => {
					let (enqueued, dropped) = self.enqueue_all();
					stats.ticks += 1;
					stats.enqueued += enqueued;
					stats.dropped += dropped;
					debug!(enqueued, dropped, conns = self.registry.len(), "periodic tcp sampling tick");
				}
			}
		}

		info!(ticks = stats.ticks, enqueued = stats.enqueued, dropped = stats.dropped, "periodic tcp sampling stopped");
		stats
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SamplingPolicy;
	use crate::diag::worker::{diag_channel, DiagWorker, Sampler};
	use crate::diag::{DiagError, DiagnosticsProbe, TcpInfoSummary};
	use crate::metrics::testing::capture_recorder;
	use std::sync::Arc;

	fn probe() -> Option<Box<dyn DiagnosticsProbe>> {
		Some(Box::new(|| Ok::<_, DiagError>(TcpInfoSummary::unavailable())))
	}

	fn queue(registry: &ConnRegistry, capacity: usize) -> (DiagHandle, DiagWorker) {
		let (recorder, _) = capture_recorder(8);
		let sampler = Sampler::new(registry.clone(), recorder, &SamplingPolicy::default());
		diag_channel(sampler, capacity, CancellationToken::new())
	}

	#[test]
	fn test_only_probed_connections_are_enqueued() {
		let registry = ConnRegistry::new();
		let _a = registry.register("a:1", "b:1", Arc::from("b"), probe());
		let _b = registry.register("a:2", "b:1", Arc::from("b"), None);
		let _c = registry.register("a:3", "b:1", Arc::from("b"), probe());

		let (diag, _worker) = queue(&registry, 8);
		let sampler = PeriodicSampler::new(registry.clone(), diag, Duration::from_secs(1), CancellationToken::new());
		assert_eq!(sampler.enqueue_all(), (2, 0));
	}

	#[test]
	fn test_overflow_is_counted_as_dropped() {
		let registry = ConnRegistry::new();
		let _regs: Vec<_> = (0..5).map(|n| registry.register(format!("a:{n}"), "b:1", Arc::from("b"), probe())).collect();

		let (diag, _worker) = queue(&registry, 3);
		let sampler = PeriodicSampler::new(registry.clone(), diag, Duration::from_secs(1), CancellationToken::new());
		assert_eq!(sampler.enqueue_all(), (3, 2));
	}

	#[tokio::test]
	async fn test_zero_interval_does_not_start() {
		let registry = ConnRegistry::new();
		let (diag, _worker) = queue(&registry, 1);
		let sampler = PeriodicSampler::new(registry.clone(), diag, Duration::ZERO, CancellationToken::new());
		assert!(sampler.start().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_ticks_after_each_interval_until_cancelled() {
		let registry = ConnRegistry::new();
		let _reg = registry.register("a:1", "b:1", Arc::from("b"), probe());
		let token = CancellationToken::new();
		let (diag, _worker) = queue(&registry, 64);
		let join = PeriodicSampler::new(registry.clone(), diag, Duration::from_secs(300), token.clone())
			.start()
			.unwrap();

		tokio::time::sleep(Duration::from_secs(299)).await;
		tokio::time::sleep(Duration::from_secs(302)).await;
		token.cancel();

		let stats = join.await.unwrap();
		assert_eq!(stats.ticks, 2);
		assert_eq!(stats.enqueued, 2);
	}

	#[tokio::test]
	async fn test_out_of_range_interval_waits_for_cancel() {
		let registry = ConnRegistry::new();
		let _reg = registry.register("a:1", "b:1", Arc::from("b"), probe());
		let (diag, _worker) = queue(&registry, 8);

		for interval in [Duration::from_secs(u64::MAX / 2), Duration::MAX] {
			let token = CancellationToken::new();
			let join = PeriodicSampler::new(registry.clone(), diag.clone(), interval, token.clone())
				.start()
				.unwrap();
			tokio::task::yield_now().await;
			assert!(!join.is_finished());

			token.cancel();
			let stats = join.await.unwrap();
			assert_eq!(stats, SchedulerStats::default());
		}
	}
}
