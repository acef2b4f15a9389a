use crate::error::{Error, Result};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
	metrics::{PeriodicReader, SdkMeterProvider},
	Resource,
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Owns the meter provider, if one was installed.
pub struct OtelGuard {
	meter_provider: Option<SdkMeterProvider>,
}

impl OtelGuard {
	/// Install the tracing subscriber, and an OTLP meter provider when an endpoint is given.
	pub fn init(otlp_endpoint: Option<&str>, export_interval: Duration) -> Result<Self> {
		let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rpc_telemetry=debug"));
		tracing_subscriber::registry()
			.with(env_filter)
			.with(tracing_subscriber::fmt::layer().with_target(true))
			.init();

		let Some(endpoint) = otlp_endpoint else {
			tracing::info!("no OTLP endpoint configured, metrics stay in-process");
			return Ok(Self { meter_provider: None });
		};

		let resource = Resource::builder()
			.with_service_name("rpc-echo")
			.with_attributes(vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
			.build();

		let exporter = opentelemetry_otlp::MetricExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint)
			.with_timeout(Duration::from_secs(5))
			.build()?;

		let reader = PeriodicReader::builder(exporter).with_interval(export_interval).build();
		let meter_provider = SdkMeterProvider::builder().with_resource(resource).with_reader(reader).build();
		global::set_meter_provider(meter_provider.clone());

		tracing::info!(otlp_endpoint = %endpoint, export_interval_secs = export_interval.as_secs(), "OpenTelemetry metrics initialized");

		Ok(Self {
			meter_provider: Some(meter_provider),
		})
	}

	/// Flush and stop the meter provider.
	pub fn shutdown(self) -> Result<()> {
		if let Some(provider) = &self.meter_provider {
			provider.shutdown().map_err(|e| Error::OpenTelemetry(e.to_string()))?;
		}
		Ok(())
	}
}
