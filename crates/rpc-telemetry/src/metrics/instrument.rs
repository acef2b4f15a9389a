use opentelemetry::metrics::{Histogram, Meter};
use opentelemetry::{global, InstrumentationScope, KeyValue};
use std::fmt;

/// Every histogram this crate emits. Names are `<prefix>.<suffix>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrument {
	CallTotal,
	StreamEstablish,
	SendStall,
	ResponseWait,
	AttemptsPerCall,
	TcpRtt,
	TcpCwnd,
	TcpRetransDelta,
}

impl Instrument {
	pub const ALL: [Self; 8] = [
		Self::CallTotal,
		Self::StreamEstablish,
		Self::SendStall,
		Self::ResponseWait,
		Self::AttemptsPerCall,
		Self::TcpRtt,
		Self::TcpCwnd,
		Self::TcpRetransDelta,
	];

	pub const fn suffix(self) -> &'static str {
		match self {
			Self::CallTotal => "call_total_ms",
			Self::StreamEstablish => "stream_establish_ms",
			Self::SendStall => "send_stall_ms",
			Self::ResponseWait => "response_wait_ms",
			Self::AttemptsPerCall => "attempts_per_call",
			Self::TcpRtt => "tcp_rtt_ms",
			Self::TcpCwnd => "tcp_cwnd",
			Self::TcpRetransDelta => "tcp_retrans_delta",
		}
	}

	pub const fn unit(self) -> &'static str {
		match self {
			Self::CallTotal | Self::StreamEstablish | Self::SendStall | Self::ResponseWait | Self::TcpRtt => "ms",
			Self::AttemptsPerCall => "{attempt}",
			Self::TcpCwnd => "{segment}",
			Self::TcpRetransDelta => "{retransmit}",
		}
	}

	pub const fn description(self) -> &'static str {
		match self {
			Self::CallTotal => "Call start until the call ended, or the first response for streams",
			Self::StreamEstablish => "Call start until request headers were sent",
			Self::SendStall => "Request headers sent until the request payload was sent",
			Self::ResponseWait => "Request payload sent until the response",
			Self::AttemptsPerCall => "Transport attempts made for one call",
			Self::TcpRtt => "Smoothed TCP round trip time of the connection",
			Self::TcpCwnd => "TCP send congestion window",
			Self::TcpRetransDelta => "TCP retransmissions since the previous sample",
		}
	}

	pub fn name(self, prefix: &str) -> String {
		format!("{prefix}.{}", self.suffix())
	}

	const fn index(self) -> usize {
		self as usize
	}
}

/// Destination for recorded values.
pub trait MetricSink: Send + Sync {
	fn record(&self, instrument: Instrument, value: f64, attributes: &[KeyValue]);
}

/// Sink backed by OpenTelemetry float histograms.
pub struct OtelSink {
	histograms: [Histogram<f64>; 8],
}

impl OtelSink {
	pub fn new(meter: &Meter, prefix: &str) -> Self {
		let histograms = Instrument::ALL.map(|instrument| {
			meter
				.f64_histogram(instrument.name(prefix))
				.with_description(instrument.description())
				.with_unit(instrument.unit())
				.build()
		});
		Self { histograms }
	}

	/// Build from the process-wide meter provider, scoped by the metric prefix.
	pub fn global(prefix: &str) -> Self {
		let scope = InstrumentationScope::builder(prefix.to_owned()).with_version(env!("CARGO_PKG_VERSION")).build();
		Self::new(&global::meter_with_scope(scope), prefix)
	}
}

impl MetricSink for OtelSink {
	fn record(&self, instrument: Instrument, value: f64, attributes: &[KeyValue]) {
		self.histograms[instrument.index()].record(value, attributes);
	}
}

impl fmt::Debug for OtelSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OtelSink").field("histograms", &self.histograms.len()).finish()
	}
}
