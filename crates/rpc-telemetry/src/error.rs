use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Setup errors surfaced to whoever builds the instrumentation or dials through it.
///
/// Nothing on the call path returns this type: telemetry failures there are
/// logged and absorbed.
#[derive(Error, Debug)]
pub enum TelemetryError {
	#[error("invalid config: {0}")]
	InvalidConfig(String),

	#[error("no tokio runtime available to host background sampling")]
	NoRuntime,

	#[error("dial {addr} failed: {source}")]
	Dial {
		addr: String,
		#[source]
		source: io::Error,
	},
}
