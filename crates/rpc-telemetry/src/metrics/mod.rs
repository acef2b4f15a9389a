//! Histogram recording for calls and TCP samples.

mod attr_cache;
mod instrument;
mod recorder;
#[cfg(test)]
pub(crate) mod testing;

pub use attr_cache::AttrCache;
pub use instrument::{Instrument, MetricSink, OtelSink};
pub use recorder::MetricsRecorder;
