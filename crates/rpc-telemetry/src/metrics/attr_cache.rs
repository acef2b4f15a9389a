use opentelemetry::KeyValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Bounded cache of attribute sets keyed by `(remote ip, method)`.
///
/// Once `ceiling` distinct sets are held the whole cache is dropped and
/// refilled, so memory stays bounded under unbounded label cardinality.
#[derive(Debug)]
pub struct AttrCache {
	inner: Mutex<Entries>,
	ceiling: usize,
}

#[derive(Debug, Default)]
struct Entries {
	by_ip: HashMap<Arc<str>, HashMap<Box<str>, Arc<[KeyValue]>>>,
	len: usize,
}

impl AttrCache {
	pub fn new(ceiling: usize) -> Self {
		Self {
			inner: Mutex::new(Entries::default()),
			ceiling: ceiling.max(1),
		}
	}

	/// Attribute set for a finished call: `method` and `remote_ip`.
	pub fn call_attrs(&self, method: &str, remote_ip: &Arc<str>) -> Arc<[KeyValue]> {
		self.get_or_build(remote_ip, method, || {
			vec![KeyValue::new("method", method.to_owned()), KeyValue::new("remote_ip", remote_ip.to_string())]
		})
	}

	/// Attribute set for a TCP sample: `remote_ip` only.
	pub fn conn_attrs(&self, remote_ip: &Arc<str>) -> Arc<[KeyValue]> {
		self.get_or_build(remote_ip, "", || vec![KeyValue::new("remote_ip", remote_ip.to_string())])
	}

	pub fn len(&self) -> usize {
		self.lock().len
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn get_or_build(&self, remote_ip: &Arc<str>, method: &str, build: impl FnOnce() -> Vec<KeyValue>) -> Arc<[KeyValue]> {
		let mut entries = self.lock();

		if let Some(attrs) = entries.by_ip.get(&**remote_ip).and_then(|by_method| by_method.get(method)) {
			return Arc::clone(attrs);
		}

		if entries.len >= self.ceiling {
			entries.by_ip.clear();
			entries.len = 0;
		}

		let attrs: Arc<[KeyValue]> = build().into();
		entries
			.by_ip
			.entry(Arc::clone(remote_ip))
			.or_default()
			.insert(method.into(), Arc::clone(&attrs));
		entries.len += 1;
		attrs
	}

	fn lock(&self) -> MutexGuard<'_, Entries> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
