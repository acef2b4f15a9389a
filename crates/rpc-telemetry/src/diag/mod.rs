//! TCP diagnostics: platform probes, the rate-limited sampling worker and the
//! periodic scheduler that feeds it.

mod probe;
mod scheduler;
mod tcp_info;
mod worker;

pub use probe::{DiagError, DiagnosticsProbe, TcpInfoSummary};
pub use scheduler::{PeriodicSampler, SchedulerStats};
pub(crate) use tcp_info::probe_for;
pub use worker::{diag_channel, DiagHandle, DiagRequest, DiagWorker, SampleOutcome, Sampler, WorkerStats};
