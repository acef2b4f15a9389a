use super::attr_cache::AttrCache;
use super::instrument::{Instrument, MetricSink};
use crate::call::CallDurations;
use crate::diag::TcpInfoSummary;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Turns finalized calls and TCP samples into histogram records.
pub struct MetricsRecorder {
	sink: Arc<dyn MetricSink>,
	call_attrs: AttrCache,
	conn_attrs: AttrCache,
}

impl MetricsRecorder {
	pub fn new(sink: Arc<dyn MetricSink>, attr_cache_ceiling: usize) -> Self {
		Self {
			sink,
			call_attrs: AttrCache::new(attr_cache_ceiling),
			conn_attrs: AttrCache::new(attr_cache_ceiling),
		}
	}

	/// One record per call histogram, all sharing `method` + `remote_ip`.
	pub fn record_call(&self, method: &str, remote_ip: &Arc<str>, durations: &CallDurations) {
		let attrs = self.call_attrs.call_attrs(method, remote_ip);

		self.sink.record(Instrument::CallTotal, millis(durations.total), &attrs);
		self.sink.record(Instrument::StreamEstablish, millis(durations.stream_establish), &attrs);
		self.sink.record(Instrument::SendStall, millis(durations.send_stall), &attrs);
		self.sink.record(Instrument::ResponseWait, millis(durations.response_wait), &attrs);
		self.sink.record(Instrument::AttemptsPerCall, f64::from(durations.attempts), &attrs);
	}

	/// Unavailable summaries record nothing.
	pub fn record_tcp(&self, remote_ip: &Arc<str>, summary: &TcpInfoSummary, retrans_delta: u32) {
		if !summary.available {
			return;
		}
		let attrs = self.conn_attrs.conn_attrs(remote_ip);

		self.sink.record(Instrument::TcpRtt, millis(summary.rtt), &attrs);
		self.sink.record(Instrument::TcpCwnd, f64::from(summary.snd_cwnd), &attrs);
		self.sink.record(Instrument::TcpRetransDelta, f64::from(retrans_delta), &attrs);
	}

	pub fn cached_label_sets(&self) -> usize {
		self.call_attrs.len() + self.conn_attrs.len()
	}
}

impl fmt::Debug for MetricsRecorder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MetricsRecorder")
			.field("call_attrs", &self.call_attrs.len())
			.field("conn_attrs", &self.conn_attrs.len())
			.finish_non_exhaustive()
	}
}

fn millis(d: Duration) -> f64 {
	d.as_secs_f64() * 1_000.0
}
