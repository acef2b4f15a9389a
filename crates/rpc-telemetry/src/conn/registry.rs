use crate::diag::DiagnosticsProbe;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

/// One live transport connection as seen by the sampler.
pub struct ConnInfo {
	key: String,
	local: String,
	remote: String,
	remote_ip: Arc<str>,
	sampling: Mutex<SamplingState>,
}

/// Mutable sampling bookkeeping; every read and write happens under the entry lock.
pub(crate) struct SamplingState {
	pub(crate) probe: Option<Box<dyn DiagnosticsProbe>>,
	pub(crate) last_sample: Option<Instant>,
	pub(crate) prev_total_retrans: u32,
}

impl ConnInfo {
	fn new(local: String, remote: String, remote_ip: Arc<str>, probe: Option<Box<dyn DiagnosticsProbe>>) -> Self {
		Self {
			key: ConnRegistry::key(&local, &remote),
			local,
			remote,
			remote_ip,
			sampling: Mutex::new(SamplingState {
				probe,
				last_sample: None,
				prev_total_retrans: 0,
			}),
		}
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn local(&self) -> &str {
		&self.local
	}

	pub fn remote(&self) -> &str {
		&self.remote
	}

	pub fn remote_ip(&self) -> &Arc<str> {
		&self.remote_ip
	}

	/// False once the connection is closing or when the platform has no probe.
	pub fn has_probe(&self) -> bool {
		self.sampling().probe.is_some()
	}

	pub fn last_sample(&self) -> Option<Instant> {
		self.sampling().last_sample
	}

	pub(crate) fn sampling(&self) -> MutexGuard<'_, SamplingState> {
		self.sampling.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Waits for any in-progress sample, so the probe's descriptor is unused afterwards.
	fn detach_probe(&self) {
		self.sampling().probe.take();
	}
}

impl fmt::Debug for ConnInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnInfo")
			.field("key", &self.key)
			.field("remote_ip", &self.remote_ip)
			.finish_non_exhaustive()
	}
}

/// Live connections keyed by `local->remote`.
#[derive(Debug, Clone, Default)]
pub struct ConnRegistry {
	conns: Arc<DashMap<String, Arc<ConnInfo>>>,
}

impl ConnRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn key(local: &str, remote: &str) -> String {
		format!("{local}->{remote}")
	}

	/// Track a connection until the returned [`Registration`] is closed or dropped.
	///
	/// A second registration of the same address pair replaces the first; closing
	/// the stale one afterwards leaves the newer entry alone.
	pub fn register(&self, local: impl Into<String>, remote: impl Into<String>, remote_ip: Arc<str>, probe: Option<Box<dyn DiagnosticsProbe>>) -> Registration {
		let info = Arc::new(ConnInfo::new(local.into(), remote.into(), remote_ip, probe));

		if self.conns.insert(info.key.clone(), Arc::clone(&info)).is_some() {
			debug!(key = %info.key, "replaced existing connection entry");
		} else {
			debug!(key = %info.key, remote_ip = %info.remote_ip, "connection registered");
		}

		Registration {
			registry: self.clone(),
			info,
			closed: AtomicBool::new(false),
		}
	}

	pub fn get(&self, local: &str, remote: &str) -> Option<Arc<ConnInfo>> {
		self.conns.get(&Self::key(local, remote)).map(|entry| Arc::clone(entry.value()))
	}

	/// Point-in-time copy of the live entries.
	pub fn snapshot(&self) -> Vec<Arc<ConnInfo>> {
		self.conns.iter().map(|entry| Arc::clone(entry.value())).collect()
	}

	pub fn len(&self) -> usize {
		self.conns.len()
	}

	pub fn is_empty(&self) -> bool {
		self.conns.is_empty()
	}

	fn deregister(&self, info: &Arc<ConnInfo>) -> bool {
		self.conns.remove_if(&info.key, |_, current| Arc::ptr_eq(current, info)).is_some()
	}
}

/// Handle that removes its entry from the registry exactly once.
#[derive(Debug)]
pub struct Registration {
	registry: ConnRegistry,
	info: Arc<ConnInfo>,
	closed: AtomicBool,
}

impl Registration {
	pub const fn info(&self) -> &Arc<ConnInfo> {
		&self.info
	}

	/// Detach the probe and remove the entry. Returns false if already closed.
	pub fn close(&self) -> bool {
		if self.closed.swap(true, Ordering::AcqRel) {
			return false;
		}

		self.info.detach_probe();
		if self.registry.deregister(&self.info) {
			debug!(key = %self.info.key, "connection deregistered");
		} else {
			debug!(key = %self.info.key, "connection entry already replaced");
		}
		true
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}
}

impl Drop for Registration {
	fn drop(&mut self) {
		self.close();
	}
}
