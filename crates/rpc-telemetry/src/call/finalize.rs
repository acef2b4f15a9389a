use super::state::{CallKind, CallState, Timeline};
use crate::clock::MonotonicClock;
use crate::metrics::MetricsRecorder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// How the call looked from the interceptor's side when it was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
	Completed,
	Failed,
	/// The caller dropped the call future before the invoker returned.
	Cancelled,
	/// Stream finished; reported by the call-ended event.
	Ended,
}

impl CallOutcome {
	pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
		match result {
			Ok(_) => Self::Completed,
			Err(_) => Self::Failed,
		}
	}
}

/// Latency breakdown of one finished call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallDurations {
	pub total: Duration,
	pub stream_establish: Duration,
	pub send_stall: Duration,
	pub response_wait: Duration,
	pub attempts: u32,
}

impl CallDurations {
	/// Derive durations from a timeline; `now` stands in for a missing end.
	///
	/// Unset timestamps and inverted orderings yield zero, never a negative span.
	pub fn derive(kind: CallKind, t: &Timeline, now: u64) -> Self {
		let end = match kind {
			CallKind::Streaming => first_set(&[t.in_payload, t.ended]).unwrap_or(now),
			CallKind::Unary => first_set(&[t.ended]).unwrap_or(now),
		};

		let stream_establish = if t.out_header > 0 { span(t.started, t.out_header) } else { Duration::ZERO };

		let send_stall = if t.out_header > 0 && t.out_payload >= t.out_header {
			span(t.out_header, t.out_payload)
		} else {
			Duration::ZERO
		};

		let response_wait = match kind {
			_ if t.out_payload == 0 => Duration::ZERO,
			CallKind::Streaming if t.in_payload >= t.out_payload => span(t.out_payload, t.in_payload),
			CallKind::Streaming => Duration::ZERO,
			CallKind::Unary => span(t.out_payload, end),
		};

		Self {
			total: span(t.started, end),
			stream_establish,
			send_stall,
			response_wait,
			attempts: t.attempts,
		}
	}
}

fn first_set(candidates: &[u64]) -> Option<u64> {
	candidates.iter().copied().find(|&stamp| stamp > 0)
}

fn span(from: u64, to: u64) -> Duration {
	Duration::from_nanos(to.saturating_sub(from))
}

/// Performs the IN_FLIGHT → FINALIZED transition and hands the result to the recorder.
#[derive(Debug)]
pub struct Finalizer {
	clock: MonotonicClock,
	recorder: Arc<MetricsRecorder>,
}

impl Finalizer {
	pub const fn new(clock: MonotonicClock, recorder: Arc<MetricsRecorder>) -> Self {
		Self { clock, recorder }
	}

	/// Returns `None` when the call was already finalized.
	pub fn finalize(&self, state: &CallState, outcome: CallOutcome) -> Option<CallDurations> {
		if !state.try_begin_finalize() {
			debug!(method = state.method(), kind = state.kind().as_str(), ?outcome, "call already finalized, skipping");
			return None;
		}

		let durations = CallDurations::derive(state.kind(), &state.timeline(), self.clock.now());
		let remote_ip = state.remote_ip();
		self.recorder.record_call(state.method(), &remote_ip, &durations);

		trace!(
			method = state.method(),
			kind = state.kind().as_str(),
			remote_ip = %remote_ip,
			remote_addr = ?state.remote_addr(),
			local_addr = ?state.local_addr(),
			?outcome,
			total_ms = durations.total.as_secs_f64() * 1_000.0,
			attempts = durations.attempts,
			"call finalized"
		);

		Some(durations)
	}
}
