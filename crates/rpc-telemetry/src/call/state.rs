use crate::conn::addr::{ip_label, UNKNOWN_IP};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Shape of a call, which also decides who owns its finalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CallKind {
	/// Finalized by the interceptor once the invoker returns.
	#[default]
	Unary,
	/// Finalized by the call-ended event, unless stream construction fails.
	Streaming,
}

impl CallKind {
	pub const ALL: [Self; 2] = [Self::Unary, Self::Streaming];

	pub const fn finalizes_on_end(self) -> bool {
		matches!(self, Self::Streaming)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Unary => "unary",
			Self::Streaming => "streaming",
		}
	}
}

/// Mutable record of one in-flight call.
///
/// `method`, `kind` and `started` are written while the pool hands the state out
/// exclusively and are read-only afterwards. Every other field is written at
/// most once from transport threads through atomics; timestamps are
/// [`MonotonicClock`](crate::MonotonicClock) stamps where 0 means unset.
#[derive(Debug, Default)]
pub struct CallState {
	method: String,
	kind: CallKind,
	started: u64,

	out_header: AtomicU64,
	out_payload: AtomicU64,
	in_header: AtomicU64,
	in_payload: AtomicU64,
	ended: AtomicU64,

	attempts: AtomicU32,

	remote_addr: OnceLock<SocketAddr>,
	local_addr: OnceLock<SocketAddr>,
	remote_ip: OnceLock<Arc<str>>,

	finalized: AtomicBool,
}

/// Plain copy of a call's timestamps, taken at finalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeline {
	pub started: u64,
	pub out_header: u64,
	pub out_payload: u64,
	pub in_header: u64,
	pub in_payload: u64,
	pub ended: u64,
	pub attempts: u32,
}

impl CallState {
	pub(crate) fn reset(&mut self, method: &str, kind: CallKind, started: u64) {
		self.method.clear();
		self.method.push_str(method);
		self.kind = kind;
		self.started = started;

		*self.out_header.get_mut() = 0;
		*self.out_payload.get_mut() = 0;
		*self.in_header.get_mut() = 0;
		*self.in_payload.get_mut() = 0;
		*self.ended.get_mut() = 0;
		*self.attempts.get_mut() = 0;

		self.remote_addr.take();
		self.local_addr.take();
		self.remote_ip.take();

		*self.finalized.get_mut() = false;
	}

	pub fn method(&self) -> &str {
		&self.method
	}

	pub const fn kind(&self) -> CallKind {
		self.kind
	}

	pub const fn started(&self) -> u64 {
		self.started
	}

	pub(crate) fn mark_out_header(&self, at: u64) -> bool {
		stamp_once(&self.out_header, at)
	}

	pub(crate) fn mark_out_payload(&self, at: u64) -> bool {
		stamp_once(&self.out_payload, at)
	}

	pub(crate) fn mark_in_header(&self, at: u64) -> bool {
		stamp_once(&self.in_header, at)
	}

	pub(crate) fn mark_in_payload(&self, at: u64) -> bool {
		stamp_once(&self.in_payload, at)
	}

	/// Unlike the other stamps, the end time is overwritten by a later end event.
	pub(crate) fn mark_ended(&self, at: u64) {
		self.ended.store(at, Ordering::Release);
	}

	pub(crate) fn record_attempt(&self) -> u32 {
		self.attempts.fetch_add(1, Ordering::AcqRel) + 1
	}

	pub(crate) fn set_addrs(&self, remote: Option<SocketAddr>, local: Option<SocketAddr>) {
		if let Some(remote) = remote {
			let _ = self.remote_addr.set(remote);
			self.remote_ip.get_or_init(|| Arc::from(ip_label(&remote)));
		}
		if let Some(local) = local {
			let _ = self.local_addr.set(local);
		}
	}

	pub fn remote_addr(&self) -> Option<SocketAddr> {
		self.remote_addr.get().copied()
	}

	pub fn local_addr(&self) -> Option<SocketAddr> {
		self.local_addr.get().copied()
	}

	/// Remote IP label, `"unknown"` until a header-sent event carried an address.
	pub fn remote_ip(&self) -> Arc<str> {
		if let Some(ip) = self.remote_ip.get() {
			return Arc::clone(ip);
		}
		match self.remote_addr.get() {
			Some(addr) => Arc::clone(self.remote_ip.get_or_init(|| Arc::from(ip_label(addr)))),
			None => Arc::from(UNKNOWN_IP),
		}
	}

	/// Claims the single FINALIZED transition. Only the first caller gets `true`.
	pub(crate) fn try_begin_finalize(&self) -> bool {
		!self.finalized.swap(true, Ordering::AcqRel)
	}

	pub fn is_finalized(&self) -> bool {
		self.finalized.load(Ordering::Acquire)
	}

	pub fn attempts(&self) -> u32 {
		self.attempts.load(Ordering::Acquire)
	}

	pub fn timeline(&self) -> Timeline {
		Timeline {
			started: self.started,
			out_header: self.out_header.load(Ordering::Acquire),
			out_payload: self.out_payload.load(Ordering::Acquire),
			in_header: self.in_header.load(Ordering::Acquire),
			in_payload: self.in_payload.load(Ordering::Acquire),
			ended: self.ended.load(Ordering::Acquire),
			attempts: self.attempts.load(Ordering::Acquire),
		}
	}
}

fn stamp_once(slot: &AtomicU64, at: u64) -> bool {
	slot.compare_exchange(0, at, Ordering::AcqRel, Ordering::Acquire).is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fresh(kind: CallKind) -> CallState {
		let mut state = CallState::default();
		state.reset("/echo.Echo/Say", kind, 100);
		state
	}

	#[test]
	fn test_first_occurrence_wins() {
		let state = fresh(CallKind::Unary);

		assert!(state.mark_out_payload(200));
		assert!(!state.mark_out_payload(150));
		assert!(!state.mark_out_payload(300));

		assert_eq!(state.timeline().out_payload, 200);
	}

	#[test]
	fn test_end_is_overwritten() {
		let state = fresh(CallKind::Streaming);
		state.mark_ended(500);
		state.mark_ended(700);
		assert_eq!(state.timeline().ended, 700);
	}

	#[test]
	fn test_reset_clears_everything() {
		let mut state = fresh(CallKind::Streaming);
		state.mark_out_header(110);
		state.mark_in_payload(130);
		state.record_attempt();
		state.set_addrs(Some("10.0.0.7:443".parse().unwrap()), Some("10.0.0.1:50000".parse().unwrap()));
		assert!(state.try_begin_finalize());

		state.reset("/other.Svc/Call", CallKind::Unary, 900);

		assert_eq!(state.method(), "/other.Svc/Call");
		assert_eq!(state.kind(), CallKind::Unary);
		assert_eq!(
			state.timeline(),
			Timeline {
				started: 900,
				..Timeline::default()
			}
		);
		assert!(state.remote_addr().is_none());
		assert!(state.local_addr().is_none());
		assert_eq!(&*state.remote_ip(), UNKNOWN_IP);
		assert!(!state.is_finalized());
	}

	#[test]
	fn test_addresses_registered_once() {
		let state = fresh(CallKind::Unary);
		state.set_addrs(None, Some("10.0.0.1:50000".parse().unwrap()));
		state.set_addrs(Some("10.0.0.7:443".parse().unwrap()), Some("10.0.0.1:50001".parse().unwrap()));

		assert_eq!(state.local_addr(), "10.0.0.1:50000".parse().ok());
		assert_eq!(state.remote_addr(), "10.0.0.7:443".parse().ok());
	}

	#[test]
	fn test_remote_ip_set_once() {
		let state = fresh(CallKind::Unary);
		state.set_addrs(Some("192.168.1.10:8080".parse().unwrap()), None);
		state.set_addrs(Some("192.168.1.99:8080".parse().unwrap()), None);

		assert_eq!(&*state.remote_ip(), "192.168.1.10");
	}

	#[test]
	fn test_finalize_claimed_once() {
		let state = fresh(CallKind::Unary);
		assert!(state.try_begin_finalize());
		assert!(!state.try_begin_finalize());
	}

	#[test]
	fn test_only_streaming_finalizes_on_end() {
		for kind in CallKind::ALL {
			assert_eq!(kind.finalizes_on_end(), kind == CallKind::Streaming, "{}", kind.as_str());
		}
	}
}
