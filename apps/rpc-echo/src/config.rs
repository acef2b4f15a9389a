use clap::{Parser, Subcommand};
use rpc_telemetry::TelemetryConfig;
use std::time::Duration;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
	#[command(subcommand)]
	pub command: Command,

	#[arg(long, global = true, env = "RPC_TELEMETRY_METRIC_PREFIX", default_value = "rgrpc", help = "Prefix for every emitted metric name")]
	pub metric_prefix: String,

	#[arg(long, global = true, env = "RPC_TELEMETRY_CLIENT_SIDE_LB", help = "Request round-robin load balancing")]
	pub client_side_lb: bool,

	#[arg(
        long,
        global = true,
        env = "RPC_TELEMETRY_TCP_INTERVAL_SECS",
        default_value = "300",
        value_parser = parse_duration,
        help = "Seconds between periodic TCP samples, 0 disables"
    )]
	pub tcp_interval: Duration,

	#[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT", help = "OTLP gRPC endpoint; metrics are only exported when set")]
	pub otlp_endpoint: Option<String>,

	#[arg(
        long,
        global = true,
        env = "OTEL_METRIC_EXPORT_INTERVAL",
        default_value = "10",
        value_parser = parse_duration,
        help = "Seconds between metric exports"
    )]
	pub metrics_export_interval: Duration,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
	/// Run the echo server
	Serve {
		#[arg(long, env = "ECHO_LISTEN", default_value = "127.0.0.1:50051")]
		listen: String,
	},
	/// Send instrumented calls to an echo server
	Call {
		#[arg(long, env = "ECHO_TARGET", default_value = "127.0.0.1:50051")]
		target: String,

		#[arg(long, default_value = "ping")]
		message: String,

		#[arg(long, default_value = "10", help = "Number of calls")]
		count: u32,

		#[arg(long, default_value = "3", help = "Replies in the closing streaming call, 0 skips it")]
		stream_replies: u32,
	},
}

impl Cli {
	pub fn telemetry_config(&self) -> TelemetryConfig {
		TelemetryConfig {
			enable_client_side_lb: self.client_side_lb,
			metric_prefix: self.metric_prefix.clone(),
			tcp_metrics_interval: self.tcp_interval,
			..TelemetryConfig::default()
		}
	}
}

fn parse_duration(s: &str) -> Result<Duration, String> {
	s.parse::<u64>().map(Duration::from_secs).map_err(|e| format!("invalid seconds {s:?}: {e}"))
}
