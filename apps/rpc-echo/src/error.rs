use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("telemetry error: {0}")]
	Telemetry(#[from] rpc_telemetry::TelemetryError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("connection closed by peer")]
	Disconnected,

	#[error("failed to initialize OTLP exporter: {0}")]
	ExporterInit(#[from] opentelemetry_otlp::ExporterBuildError),

	#[error("OpenTelemetry error: {0}")]
	OpenTelemetry(String),
}
