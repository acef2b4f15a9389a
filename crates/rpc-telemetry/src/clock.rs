use std::time::Instant;

/// Monotonic nanosecond clock shared by every timestamp of one instrumentation.
///
/// Stamps are nanoseconds since `origin`, shifted so a real stamp is never 0;
/// 0 is reserved for "unset" in [`CallState`](crate::call::CallState).
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
	origin: Instant,
}

impl MonotonicClock {
	pub fn new() -> Self {
		Self { origin: Instant::now() }
	}

	pub fn now(&self) -> u64 {
		self.stamp(Instant::now())
	}

	/// Instants earlier than the origin collapse onto the first valid stamp.
	pub fn stamp(&self, at: Instant) -> u64 {
		let nanos = at.saturating_duration_since(self.origin).as_nanos();
		u64::try_from(nanos).unwrap_or(u64::MAX).max(1)
	}

	pub fn stamp_or_now(&self, at: Option<Instant>) -> u64 {
		at.map_or_else(|| self.now(), |at| self.stamp(at))
	}
}

impl Default for MonotonicClock {
	fn default() -> Self {
		Self::new()
	}
}
