use std::io;
use std::time::Duration;
use thiserror::Error;

/// Condensed kernel view of one TCP connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpInfoSummary {
	/// False means every other field is meaningless and nothing gets recorded.
	pub available: bool,
	pub rtt: Duration,
	pub snd_cwnd: u32,
	/// Cumulative; the worker turns it into a per-sample delta.
	pub total_retrans: u32,
}

impl TcpInfoSummary {
	pub const fn unavailable() -> Self {
		Self {
			available: false,
			rtt: Duration::ZERO,
			snd_cwnd: 0,
			total_retrans: 0,
		}
	}
}

#[derive(Error, Debug)]
pub enum DiagError {
	#[error("TCP_INFO is not supported on this platform")]
	Unsupported,

	#[error("getsockopt(TCP_INFO) failed: {0}")]
	Io(#[from] io::Error),
}

/// Something that can read TCP diagnostics for one live connection.
///
/// Implementations must not block beyond a single syscall.
pub trait DiagnosticsProbe: Send + Sync {
	fn sample(&self) -> Result<TcpInfoSummary, DiagError>;
}

impl<F> DiagnosticsProbe for F
where
	F: Fn() -> Result<TcpInfoSummary, DiagError> + Send + Sync,
{
	fn sample(&self) -> Result<TcpInfoSummary, DiagError> {
		self()
	}
}
