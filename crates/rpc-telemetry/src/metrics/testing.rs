use super::instrument::{Instrument, MetricSink};
use super::recorder::MetricsRecorder;
use opentelemetry::KeyValue;
use std::sync::{Arc, Mutex};

type Record = (Instrument, f64, Vec<(String, String)>);

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct CaptureSink {
	records: Mutex<Vec<Record>>,
}

impl CaptureSink {
	pub fn count(&self, instrument: Instrument) -> usize {
		self.records.lock().unwrap().iter().filter(|(i, ..)| *i == instrument).count()
	}

	pub fn values(&self, instrument: Instrument) -> Vec<f64> {
		self.records.lock().unwrap().iter().filter(|(i, ..)| *i == instrument).map(|(_, v, _)| *v).collect()
	}

	pub fn labels(&self, instrument: Instrument) -> Vec<Vec<(String, String)>> {
		self.records
			.lock()
			.unwrap()
			.iter()
			.filter(|(i, ..)| *i == instrument)
			.map(|(.., labels)| labels.clone())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.records.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl MetricSink for CaptureSink {
	fn record(&self, instrument: Instrument, value: f64, attributes: &[KeyValue]) {
		let labels = attributes.iter().map(|kv| (kv.key.to_string(), kv.value.to_string())).collect();
		self.records.lock().unwrap().push((instrument, value, labels));
	}
}

pub fn capture_recorder(attr_cache_ceiling: usize) -> (Arc<MetricsRecorder>, Arc<CaptureSink>) {
	let sink = Arc::new(CaptureSink::default());
	let recorder = Arc::new(MetricsRecorder::new(Arc::clone(&sink) as Arc<dyn MetricSink>, attr_cache_ceiling));
	(recorder, sink)
}
