//! Per-call lifecycle tracking: pooled state, transport events and the
//! one-shot finalization that turns a timeline into latency metrics.

mod events;
mod finalize;
mod handler;
mod interceptor;
mod pool;
mod state;

pub use events::CallEvent;
pub use finalize::{CallDurations, CallOutcome, Finalizer};
pub use handler::{CallContext, StatsHandler};
pub use interceptor::Interceptor;
pub use pool::{CallLease, PoolStats, StatePool};
pub use state::{CallKind, CallState, Timeline};
