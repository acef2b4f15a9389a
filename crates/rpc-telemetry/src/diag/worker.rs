use crate::config::SamplingPolicy;
use crate::conn::{ConnInfo, ConnRegistry};
use crate::diag::TcpInfoSummary;
use crate::metrics::MetricsRecorder;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Ask to sample one connection, identified by its address pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagRequest {
	pub local: String,
	pub remote: String,
	pub remote_ip: Arc<str>,
}

impl DiagRequest {
	pub fn for_conn(info: &ConnInfo) -> Self {
		Self {
			local: info.local().to_owned(),
			remote: info.remote().to_owned(),
			remote_ip: Arc::clone(info.remote_ip()),
		}
	}
}

/// What happened to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
	RateLimited,
	/// No registry entry for the pair any more.
	ConnectionClosed,
	/// The entry exists but has no probe attached.
	NoProbe,
	CoolingDown { remaining: Duration },
	/// The probe failed or reported unavailable; the cooldown clock is untouched.
	Unavailable,
	Recorded { summary: TcpInfoSummary, retrans_delta: u32 },
}

/// Applies rate limit, lookup and cooldown, then samples and records.
pub struct Sampler {
	registry: ConnRegistry,
	recorder: Arc<MetricsRecorder>,
	limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
	cooldown: Duration,
}

impl Sampler {
	pub fn new(registry: ConnRegistry, recorder: Arc<MetricsRecorder>, policy: &SamplingPolicy) -> Self {
		let rate = NonZeroU32::new(policy.rate_per_sec).unwrap_or(NonZeroU32::MIN);
		let burst = NonZeroU32::new(policy.burst).unwrap_or(NonZeroU32::MIN);

		Self {
			registry,
			recorder,
			limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
			cooldown: policy.cooldown,
		}
	}

	pub fn process(&self, req: &DiagRequest, now: Instant) -> SampleOutcome {
		if self.limiter.check().is_err() {
			return SampleOutcome::RateLimited;
		}

		let Some(info) = self.registry.get(&req.local, &req.remote) else {
			return SampleOutcome::ConnectionClosed;
		};

		let mut sampling = info.sampling();
		let Some(probe) = sampling.probe.as_ref() else {
			return SampleOutcome::NoProbe;
		};

		if let Some(last) = sampling.last_sample {
			let elapsed = now.saturating_duration_since(last);
			if elapsed < self.cooldown {
				return SampleOutcome::CoolingDown {
					remaining: self.cooldown - elapsed,
				};
			}
		}

		let summary = match probe.sample() {
			Ok(summary) if summary.available => summary,
			Ok(_) => return SampleOutcome::Unavailable,
			Err(e) => {
				debug!(key = info.key(), error = %e, "tcp diagnostics sample failed");
				return SampleOutcome::Unavailable;
			}
		};

		let retrans_delta = summary.total_retrans.saturating_sub(sampling.prev_total_retrans);
		sampling.prev_total_retrans = summary.total_retrans;
		sampling.last_sample = Some(now);
		drop(sampling);

		self.recorder.record_tcp(&req.remote_ip, &summary, retrans_delta);
		trace!(key = info.key(), rtt_us = summary.rtt.as_micros(), cwnd = summary.snd_cwnd, retrans_delta, "tcp sample recorded");

		SampleOutcome::Recorded { summary, retrans_delta }
	}
}

/// Producer side of the diagnostics queue. Never blocks.
#[derive(Debug, Clone)]
pub struct DiagHandle {
	tx: mpsc::Sender<DiagRequest>,
	dropped: Arc<AtomicU64>,
}

impl DiagHandle {
	/// Returns false when the request was dropped because the queue is full or closed.
	pub fn enqueue(&self, req: DiagRequest) -> bool {
		match self.tx.try_send(req) {
			Ok(()) => true,
			Err(TrySendError::Full(req)) => {
				self.dropped.fetch_add(1, Ordering::Relaxed);
				trace!(local = %req.local, remote = %req.remote, "diagnostics queue full, request dropped");
				false
			}
			Err(TrySendError::Closed(_)) => false,
		}
	}

	/// Connections without a probe are skipped.
	pub fn enqueue_conn(&self, info: &ConnInfo) -> bool {
		info.has_probe() && self.enqueue(DiagRequest::for_conn(info))
	}

	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
	pub processed: u64,
	pub recorded: u64,
	pub rate_limited: u64,
	pub cooling_down: u64,
	pub skipped: u64,
	pub unavailable: u64,
}

impl WorkerStats {
	fn observe(&mut self, outcome: &SampleOutcome) {
		self.processed += 1;
		match outcome {
			SampleOutcome::Recorded { .. } => self.recorded += 1,
			SampleOutcome::RateLimited => self.rate_limited += 1,
			SampleOutcome::CoolingDown { .. } => self.cooling_down += 1,
			SampleOutcome::ConnectionClosed | SampleOutcome::NoProbe => self.skipped += 1,
			SampleOutcome::Unavailable => self.unavailable += 1,
		}
	}
}

/// Single consumer of the diagnostics queue.
pub struct DiagWorker {
	sampler: Sampler,
	rx: mpsc::Receiver<DiagRequest>,
	shutdown_token: CancellationToken,
}

/// Build the bounded queue and its worker; nothing runs until [`DiagWorker::start`].
pub fn diag_channel(sampler: Sampler, capacity: usize, shutdown_token: CancellationToken) -> (DiagHandle, DiagWorker) {
	let (tx, rx) = mpsc::channel(capacity.max(1));
	let handle = DiagHandle {
		tx,
		dropped: Arc::new(AtomicU64::new(0)),
	};
	(handle, DiagWorker { sampler, rx, shutdown_token })
}

impl DiagWorker {
	pub fn start(self) -> JoinHandle<WorkerStats> {
		tokio::spawn(async move { self.run().await })
	}

	async fn run(mut self) -> WorkerStats {
		let mut stats = WorkerStats::default();
		debug!("diagnostics worker starting");

		loop {
			tokio::select! {
				biased;
				() = self.shutdown_token.cancelled() => break,
				req = self.rx.recv() => {
					let Some(req) = req else { break };
					let outcome = self.sampler.process(&req, Instant::now());
					stats.observe(&outcome);
				}
			}
		}

		info!(
			processed = stats.processed,
			recorded = stats.recorded,
			rate_limited = stats.rate_limited,
			cooling_down = stats.cooling_down,
			skipped = stats.skipped,
			unavailable = stats.unavailable,
			"diagnostics worker stopped"
		);
		stats
	}
}
