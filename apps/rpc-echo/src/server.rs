use crate::error::Result;
use crate::protocol::{Request, STREAM_END};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Serve the echo protocol until `shutdown_token` is cancelled.
pub async fn run(listener: TcpListener, shutdown_token: CancellationToken) -> Result<()> {
	info!(addr = %listener.local_addr()?, "echo server listening");

	loop {
		tokio::select! {
			() = shutdown_token.cancelled() => break,
			accepted = listener.accept() => {
				let (stream, peer) = accepted?;
				let token = shutdown_token.child_token();
				tokio::spawn(async move {
					if let Err(e) = serve_conn(stream, peer, token).await {
						warn!(%peer, error = %e, "connection ended with error");
					}
				});
			}
		}
	}

	info!("echo server stopped");
	Ok(())
}

async fn serve_conn(stream: TcpStream, peer: SocketAddr, shutdown_token: CancellationToken) -> Result<()> {
	debug!(%peer, "connection accepted");
	let (read, mut write) = stream.into_split();
	let mut lines = BufReader::new(read).lines();

	loop {
		let line = tokio::select! {
			() = shutdown_token.cancelled() => break,
			line = lines.next_line() => line?,
		};
		let Some(line) = line else { break };

		let reply = match Request::parse(&line) {
			Ok(Request::Say(text)) => format!("{text}\n"),
			Ok(Request::Chat { count, text }) => {
				let mut reply: String = (0..count).map(|n| format!("{text} {n}\n")).collect();
				reply.push_str(STREAM_END);
				reply.push('\n');
				reply
			}
			Err(e) => {
				warn!(%peer, error = %e, "bad request");
				format!("ERR {e}\n")
			}
		};
		write.write_all(reply.as_bytes()).await?;
	}

	debug!(%peer, "connection closed");
	Ok(())
}
