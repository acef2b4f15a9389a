use super::finalize::{CallOutcome, Finalizer};
use super::handler::{CallContext, StatsHandler};
use super::pool::StatePool;
use super::state::CallKind;
use crate::clock::MonotonicClock;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Wraps outgoing calls so each one carries a pooled [`CallContext`].
///
/// Unary calls are finalized here once the invoker resolves. Streaming calls
/// are only finalized here when the stream could not be built; otherwise the
/// call-ended event owns the transition.
#[derive(Debug, Clone)]
pub struct Interceptor {
	clock: MonotonicClock,
	pool: Arc<StatePool>,
	handler: Arc<StatsHandler>,
	finalizer: Arc<Finalizer>,
}

impl Interceptor {
	pub const fn new(clock: MonotonicClock, pool: Arc<StatePool>, handler: Arc<StatsHandler>, finalizer: Arc<Finalizer>) -> Self {
		Self {
			clock,
			pool,
			handler,
			finalizer,
		}
	}

	fn begin(&self, method: &str, kind: CallKind) -> CallContext {
		let lease = self.pool.acquire(method, kind, self.clock.now());
		CallContext::new(lease, Arc::clone(&self.handler))
	}

	/// Run a unary call. The invoker receives the context to emit events into
	/// and must resolve only once the call has fully completed.
	pub async fn unary<F, Fut, T, E>(&self, method: &str, invoker: F) -> Result<T, E>
	where
		F: FnOnce(CallContext) -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		let ctx = self.begin(method, CallKind::Unary);
		let guard = UnaryGuard {
			ctx: &ctx,
			finalizer: &self.finalizer,
		};

		let result = invoker(ctx.clone()).await;
		guard.finish(CallOutcome::from_result(&result));
		result
	}

	/// Construct a streaming call. On success the stream keeps its context and
	/// must emit [`CallEvent::End`](super::CallEvent::End) when it finishes.
	pub async fn streaming<F, Fut, S, E>(&self, method: &str, streamer: F) -> Result<S, E>
	where
		F: FnOnce(CallContext) -> Fut,
		Fut: Future<Output = Result<S, E>>,
	{
		let ctx = self.begin(method, CallKind::Streaming);

		match streamer(ctx.clone()).await {
			Ok(stream) => Ok(stream),
			Err(err) => {
				debug!(method, "stream construction failed, finalizing immediately");
				self.finalizer.finalize(ctx.state(), CallOutcome::Failed);
				Err(err)
			}
		}
	}
}

/// Finalizes a unary call even when its future is dropped mid-flight.
struct UnaryGuard<'a> {
	ctx: &'a CallContext,
	finalizer: &'a Finalizer,
}

impl UnaryGuard<'_> {
	fn finish(self, outcome: CallOutcome) {
		self.finalizer.finalize(self.ctx.state(), outcome);
	}
}

impl Drop for UnaryGuard<'_> {
	fn drop(&mut self) {
		if !self.ctx.state().is_finalized() {
			self.finalizer.finalize(self.ctx.state(), CallOutcome::Cancelled);
		}
	}
}
