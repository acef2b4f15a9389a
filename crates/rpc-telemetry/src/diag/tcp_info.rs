use super::probe::{DiagError, DiagnosticsProbe, TcpInfoSummary};
use tokio::net::TcpStream;

/// Build the platform probe for a connected stream, if the platform has one.
///
/// The probe reads the stream's raw descriptor, so it must be detached before
/// the stream is dropped; only the registry hands probes out.
pub(crate) fn probe_for(stream: &TcpStream) -> Option<Box<dyn DiagnosticsProbe>> {
	imp::probe_for(stream)
}

#[cfg(target_os = "linux")]
mod imp {
	use super::{DiagError, DiagnosticsProbe, TcpInfoSummary, TcpStream};
	use std::io;
	use std::mem;
	use std::os::fd::{AsRawFd, RawFd};
	use std::time::Duration;

	/// Reads `TCP_INFO` through a borrowed descriptor.
	///
	/// The descriptor is only valid while the owning stream is open; the registry
	/// detaches the probe before the stream closes.
	#[derive(Debug)]
	struct TcpInfoProbe {
		fd: RawFd,
	}

	pub(super) fn probe_for(stream: &TcpStream) -> Option<Box<dyn DiagnosticsProbe>> {
		Some(Box::new(TcpInfoProbe { fd: stream.as_raw_fd() }))
	}

	impl DiagnosticsProbe for TcpInfoProbe {
		fn sample(&self) -> Result<TcpInfoSummary, DiagError> {
			// SAFETY: tcp_info is plain old data; all-zero is a valid value.
			let mut info: libc::tcp_info = unsafe { mem::zeroed() };
			let mut len = libc::socklen_t::try_from(mem::size_of::<libc::tcp_info>()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

			// SAFETY: `info` and `len` are live locals sized for TCP_INFO, and the
			// kernel writes at most `len` bytes.
			let rc = unsafe { libc::getsockopt(self.fd, libc::IPPROTO_TCP, libc::TCP_INFO, std::ptr::addr_of_mut!(info).cast(), &mut len) };
			if rc != 0 {
				return Err(DiagError::Io(io::Error::last_os_error()));
			}

			Ok(TcpInfoSummary {
				available: true,
				rtt: Duration::from_micros(u64::from(info.tcpi_rtt)),
				snd_cwnd: info.tcpi_snd_cwnd,
				total_retrans: info.tcpi_total_retrans,
			})
		}
	}
}

#[cfg(not(target_os = "linux"))]
mod imp {
	use super::{DiagnosticsProbe, TcpStream};

	pub(super) fn probe_for(_stream: &TcpStream) -> Option<Box<dyn DiagnosticsProbe>> {
		None
	}
}
