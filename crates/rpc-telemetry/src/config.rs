use crate::error::{Result, TelemetryError};
use std::sync::RwLock;
use std::time::Duration;

pub const DEFAULT_METRIC_PREFIX: &str = "rgrpc";
pub const DEFAULT_TCP_METRICS_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_ATTR_CACHE_CEILING: usize = 4096;
pub const DEFAULT_POOL_MAX_IDLE: usize = 1024;

const ROUND_ROBIN_SERVICE_CONFIG: &str = r#"{"loadBalancingConfig":[{"round_robin":{}}]}"#;

/// Configuration for one [`Instrumentation`](crate::Instrumentation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
	/// Ask the transport for round-robin over resolved endpoints instead of pick-first.
	pub enable_client_side_lb: bool,
	/// Prefix for every emitted instrument name, e.g. `rgrpc.call_total_ms`.
	pub metric_prefix: String,
	/// How often every live connection is queued for TCP diagnostics. Zero disables it.
	pub tcp_metrics_interval: Duration,
	pub sampling: SamplingPolicy,
	/// Label-set cache size per cache; the cache is cleared when it fills up.
	pub attr_cache_ceiling: usize,
	/// Idle call states kept around for reuse.
	pub pool_max_idle: usize,
}

/// Bounds on diagnostics work regardless of how many connections are open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingPolicy {
	pub rate_per_sec: u32,
	pub burst: u32,
	pub cooldown: Duration,
	pub queue_capacity: usize,
}

impl Default for SamplingPolicy {
	fn default() -> Self {
		Self {
			rate_per_sec: 4,
			burst: 8,
			cooldown: Duration::from_secs(10),
			queue_capacity: 512,
		}
	}
}

impl Default for TelemetryConfig {
	fn default() -> Self {
		Self {
			enable_client_side_lb: false,
			metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
			tcp_metrics_interval: DEFAULT_TCP_METRICS_INTERVAL,
			sampling: SamplingPolicy::default(),
			attr_cache_ceiling: DEFAULT_ATTR_CACHE_CEILING,
			pool_max_idle: DEFAULT_POOL_MAX_IDLE,
		}
	}
}

/// Endpoint selection the transport should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingPolicy {
	PickFirst,
	RoundRobin,
}

impl LoadBalancingPolicy {
	/// Service config JSON to hand to the transport, if the default is not wanted.
	pub const fn service_config(self) -> Option<&'static str> {
		match self {
			Self::PickFirst => None,
			Self::RoundRobin => Some(ROUND_ROBIN_SERVICE_CONFIG),
		}
	}
}

impl TelemetryConfig {
	pub fn validate(&self) -> Result<()> {
		if self.metric_prefix.trim().is_empty() {
			return Err(TelemetryError::InvalidConfig("metric_prefix cannot be empty".to_string()));
		}
		if self.sampling.rate_per_sec == 0 {
			return Err(TelemetryError::InvalidConfig("sampling.rate_per_sec must be > 0".to_string()));
		}
		if self.sampling.burst == 0 {
			return Err(TelemetryError::InvalidConfig("sampling.burst must be > 0".to_string()));
		}
		if self.sampling.queue_capacity == 0 {
			return Err(TelemetryError::InvalidConfig("sampling.queue_capacity must be > 0".to_string()));
		}
		if self.attr_cache_ceiling == 0 {
			return Err(TelemetryError::InvalidConfig("attr_cache_ceiling must be > 0".to_string()));
		}
		Ok(())
	}

	pub const fn load_balancing(&self) -> LoadBalancingPolicy {
		if self.enable_client_side_lb {
			LoadBalancingPolicy::RoundRobin
		} else {
			LoadBalancingPolicy::PickFirst
		}
	}

	/// Load configuration from `RPC_TELEMETRY_*` environment variables over the defaults.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	fn from_lookup<F>(lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self::default();

		if let Some(prefix) = lookup("RPC_TELEMETRY_METRIC_PREFIX") {
			config.metric_prefix = prefix;
		}
		if let Some(lb) = lookup("RPC_TELEMETRY_CLIENT_SIDE_LB") {
			config.enable_client_side_lb = parse_bool("RPC_TELEMETRY_CLIENT_SIDE_LB", &lb)?;
		}
		if let Some(secs) = lookup("RPC_TELEMETRY_TCP_INTERVAL_SECS") {
			config.tcp_metrics_interval = parse_interval("RPC_TELEMETRY_TCP_INTERVAL_SECS", &secs)?;
		}
		if let Some(secs) = lookup("RPC_TELEMETRY_SAMPLE_COOLDOWN_SECS") {
			config.sampling.cooldown = parse_interval("RPC_TELEMETRY_SAMPLE_COOLDOWN_SECS", &secs)?;
		}
		if let Some(rate) = lookup("RPC_TELEMETRY_SAMPLE_RATE") {
			config.sampling.rate_per_sec = rate
				.parse()
				.map_err(|e| TelemetryError::InvalidConfig(format!("RPC_TELEMETRY_SAMPLE_RATE={rate}: {e}")))?;
		}
		if let Some(burst) = lookup("RPC_TELEMETRY_SAMPLE_BURST") {
			config.sampling.burst = burst
				.parse()
				.map_err(|e| TelemetryError::InvalidConfig(format!("RPC_TELEMETRY_SAMPLE_BURST={burst}: {e}")))?;
		}

		config.validate()?;
		Ok(config)
	}
}

fn parse_interval(key: &str, raw: &str) -> Result<Duration> {
	let secs: i64 = raw.trim().parse().map_err(|e| TelemetryError::InvalidConfig(format!("{key}={raw}: {e}")))?;
	u64::try_from(secs)
		.map(Duration::from_secs)
		.map_err(|_| TelemetryError::InvalidConfig(format!("{key} must be >= 0, got {secs}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		other => Err(TelemetryError::InvalidConfig(format!("{key}: expected a boolean, got {other:?}"))),
	}
}

static PROCESS_DEFAULT: RwLock<Option<TelemetryConfig>> = RwLock::new(None);

/// Replace the process-wide configuration used by
/// [`Instrumentation::with_default_config`](crate::Instrumentation::with_default_config).
///
/// Nothing else reads it; explicit configuration always wins.
pub fn set_default_config(config: TelemetryConfig) {
	let mut slot = PROCESS_DEFAULT.write().unwrap_or_else(std::sync::PoisonError::into_inner);
	*slot = Some(config);
}

pub fn default_config() -> TelemetryConfig {
	PROCESS_DEFAULT
		.read()
		.unwrap_or_else(std::sync::PoisonError::into_inner)
		.clone()
		.unwrap_or_default()
}
