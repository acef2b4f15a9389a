mod client;
mod config;
mod error;
mod observability;
mod protocol;
mod server;

use crate::client::EchoClient;
use crate::config::{Cli, Command};
use crate::error::Result;
use crate::observability::OtelGuard;
use clap::Parser;
use rpc_telemetry::Instrumentation;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let otel = OtelGuard::init(cli.otlp_endpoint.as_deref(), cli.metrics_export_interval)?;

	let result = match cli.command.clone() {
		Command::Serve { listen } => serve(&listen).await,
		Command::Call {
			target,
			message,
			count,
			stream_replies,
		} => call(&cli, &target, &message, count, stream_replies).await,
	};

	otel.shutdown()?;
	result
}

async fn serve(listen: &str) -> Result<()> {
	let listener = TcpListener::bind(listen).await?;
	let shutdown_token = CancellationToken::new();

	let token = shutdown_token.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("shutdown signal received");
		}
		token.cancel();
	});

	server::run(listener, shutdown_token).await
}

async fn call(cli: &Cli, target: &str, message: &str, count: u32, stream_replies: u32) -> Result<()> {
	let inst = Arc::new(Instrumentation::new(cli.telemetry_config())?);
	if let Some(service_config) = inst.load_balancing().service_config() {
		info!(service_config, "client-side load balancing requested");
	}

	let mut client = EchoClient::connect(Arc::clone(&inst), target).await?;
	let started = Instant::now();

	for n in 0..count {
		let reply = client.say(&format!("{message} {n}")).await?;
		info!(call = n, %reply, "unary reply");
	}

	if stream_replies > 0 {
		let mut echo = client.chat(message, stream_replies).await?;
		let mut received = 0;
		while let Some(line) = echo.next().await? {
			received += 1;
			debug!(%line, "stream reply");
		}
		info!(received, "stream finished");
	}

	if !inst.request_sample(client.conn().info()) {
		warn!("tcp sample request was not queued");
	}
	tokio::time::sleep(std::time::Duration::from_millis(100)).await;

	client.close().await?;
	let report = inst.shutdown().await;
	let pool = inst.pool_stats();

	info!(
		calls = count,
		elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0,
		pool_acquired = pool.acquired,
		pool_outstanding = pool.outstanding(),
		samples_recorded = report.worker.map_or(0, |w| w.recorded),
		"calls complete"
	);
	Ok(())
}
