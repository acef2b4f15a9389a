use super::state::{CallKind, CallState};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Free list of call states.
///
/// A state leaves the pool as a [`CallLease`]. Leases can be cloned; the state
/// comes back when the last clone is dropped, so it is returned exactly once
/// and nothing can still reference it once it is back in the free list. The
/// shared shell is pooled along with the state.
#[derive(Debug)]
pub struct StatePool {
	idle: Mutex<Vec<Arc<Slot>>>,
	max_idle: usize,
	acquired: AtomicU64,
	released: AtomicU64,
}

#[derive(Debug, Default)]
struct Slot {
	state: CallState,
	holders: AtomicUsize,
}

impl Slot {
	fn new(method: &str, kind: CallKind, started: u64) -> Self {
		let mut slot = Self::default();
		slot.reset(method, kind, started);
		slot
	}

	fn reset(&mut self, method: &str, kind: CallKind, started: u64) {
		self.state.reset(method, kind, started);
		*self.holders.get_mut() = 1;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
	pub acquired: u64,
	pub released: u64,
	pub idle: usize,
}

impl PoolStats {
	pub const fn outstanding(&self) -> u64 {
		self.acquired.saturating_sub(self.released)
	}
}

impl StatePool {
	pub fn new(max_idle: usize) -> Arc<Self> {
		Arc::new(Self {
			idle: Mutex::new(Vec::new()),
			max_idle,
			acquired: AtomicU64::new(0),
			released: AtomicU64::new(0),
		})
	}

	/// Hand out a zeroed state initialised for a new call.
	pub fn acquire(self: &Arc<Self>, method: &str, kind: CallKind, started: u64) -> CallLease {
		// a clone still dropping its handle makes the shell unusable; start fresh then
		let idle = self.lock_idle().pop();
		let reused = idle.and_then(|mut slot| {
			Arc::get_mut(&mut slot)?.reset(method, kind, started);
			Some(slot)
		});
		let slot = reused.unwrap_or_else(|| Arc::new(Slot::new(method, kind, started)));
		self.acquired.fetch_add(1, Ordering::Relaxed);

		CallLease {
			slot: Some(slot),
			pool: Arc::clone(self),
		}
	}

	pub fn stats(&self) -> PoolStats {
		PoolStats {
			acquired: self.acquired.load(Ordering::Relaxed),
			released: self.released.load(Ordering::Relaxed),
			idle: self.lock_idle().len(),
		}
	}

	fn put(&self, slot: Arc<Slot>) {
		self.released.fetch_add(1, Ordering::Relaxed);
		let mut idle = self.lock_idle();
		if idle.len() < self.max_idle {
			idle.push(slot);
		}
	}

	fn lock_idle(&self) -> MutexGuard<'_, Vec<Arc<Slot>>> {
		self.idle.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Shared claim on a pooled [`CallState`]; returning it is dropping the last clone.
#[derive(Debug)]
pub struct CallLease {
	slot: Option<Arc<Slot>>,
	pool: Arc<StatePool>,
}

impl CallLease {
	/// Drop this clone now. The state goes back once every clone is released.
	pub fn release(self) {
		drop(self);
	}

	fn slot(&self) -> &Arc<Slot> {
		match self.slot.as_ref() {
			Some(slot) => slot,
			None => unreachable!("slot is only taken when the lease drops"),
		}
	}
}

impl Clone for CallLease {
	fn clone(&self) -> Self {
		let slot = self.slot();
		slot.holders.fetch_add(1, Ordering::Relaxed);
		Self {
			slot: Some(Arc::clone(slot)),
			pool: Arc::clone(&self.pool),
		}
	}
}

impl Deref for CallLease {
	type Target = CallState;

	fn deref(&self) -> &CallState {
		&self.slot().state
	}
}

impl Drop for CallLease {
	fn drop(&mut self) {
		if let Some(slot) = self.slot.take() {
			if slot.holders.fetch_sub(1, Ordering::AcqRel) == 1 {
				self.pool.put(slot);
			}
		}
	}
}
