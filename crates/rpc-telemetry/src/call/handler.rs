use super::events::CallEvent;
use super::finalize::{CallDurations, CallOutcome, Finalizer};
use super::pool::CallLease;
use super::state::{CallKind, CallState};
use crate::clock::MonotonicClock;
use std::sync::Arc;
use tracing::trace;

/// Reacts to transport lifecycle events for calls started by the interceptors.
///
/// Every stamp has first-occurrence semantics, so duplicate or late events are
/// harmless. Only streaming calls are finalized here.
#[derive(Debug)]
pub struct StatsHandler {
	clock: MonotonicClock,
	finalizer: Arc<Finalizer>,
}

impl StatsHandler {
	pub const fn new(clock: MonotonicClock, finalizer: Arc<Finalizer>) -> Self {
		Self { clock, finalizer }
	}

	/// Apply one event; returns the durations if this event finalized the call.
	pub fn handle(&self, state: &CallState, event: CallEvent) -> Option<CallDurations> {
		let at = self.clock.stamp_or_now(event.timestamp());
		trace!(method = state.method(), event = event.name(), at, "call event");

		match event {
			CallEvent::OutHeader { remote_addr, local_addr, .. } => {
				state.mark_out_header(at);
				state.record_attempt();
				state.set_addrs(remote_addr, local_addr);
				None
			}
			CallEvent::OutPayload { .. } => {
				state.mark_out_payload(at);
				None
			}
			CallEvent::InHeader { .. } => {
				state.mark_in_header(at);
				None
			}
			CallEvent::InPayload { .. } => {
				state.mark_in_payload(at);
				None
			}
			CallEvent::End { .. } => {
				state.mark_ended(at);
				if state.kind().finalizes_on_end() {
					self.finalizer.finalize(state, CallOutcome::Ended)
				} else {
					None
				}
			}
		}
	}
}

/// Per-call event sink handed to the transport by the interceptors.
///
/// Clones share one pooled [`CallState`]; the state goes back to the pool when
/// the last clone is dropped.
#[derive(Debug, Clone)]
pub struct CallContext {
	lease: CallLease,
	handler: Arc<StatsHandler>,
}

impl CallContext {
	pub(crate) fn new(lease: CallLease, handler: Arc<StatsHandler>) -> Self {
		Self { lease, handler }
	}

	/// Push a lifecycle event for this call.
	pub fn emit(&self, event: CallEvent) -> Option<CallDurations> {
		self.handler.handle(&self.lease, event)
	}

	pub fn state(&self) -> &CallState {
		&self.lease
	}

	pub fn method(&self) -> &str {
		self.lease.method()
	}

	pub fn kind(&self) -> CallKind {
		self.lease.kind()
	}
}
