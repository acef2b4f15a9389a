use crate::error::{Error, Result};
use crate::protocol::{Request, STREAM_END};
use rpc_telemetry::{CallContext, CallEvent, Instrumentation, TrackedConn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

const SAY_METHOD: &str = "/echo.Echo/Say";
const CHAT_METHOD: &str = "/echo.Echo/Chat";

type Io = BufReader<TrackedConn<TcpStream>>;

/// Echo client over one instrumented connection.
pub struct EchoClient {
	inst: Arc<Instrumentation>,
	io: Io,
	peer: Option<SocketAddr>,
	local: Option<SocketAddr>,
}

impl EchoClient {
	pub async fn connect(inst: Arc<Instrumentation>, target: &str) -> Result<Self> {
		let conn = inst.dial(target).await?;
		let peer = conn.get_ref().peer_addr().ok();
		let local = conn.get_ref().local_addr().ok();
		debug!(key = conn.info().key(), "echo client connected");

		Ok(Self {
			inst,
			io: BufReader::new(conn),
			peer,
			local,
		})
	}

	pub fn conn(&self) -> &TrackedConn<TcpStream> {
		self.io.get_ref()
	}

	/// One request, one reply.
	pub async fn say(&mut self, text: &str) -> Result<String> {
		let request = Request::Say(text.to_string()).to_string();
		let (peer, local) = (self.peer, self.local);
		let io = &mut self.io;

		self.inst
			.unary(SAY_METHOD, |ctx| async move {
				ctx.emit(CallEvent::out_header(peer, local));
				io.get_mut().write_all(request.as_bytes()).await?;
				ctx.emit(CallEvent::out_payload());

				let line = read_reply(io).await?;
				ctx.emit(CallEvent::in_header());
				ctx.emit(CallEvent::in_payload());
				ctx.emit(CallEvent::end());
				Ok::<_, Error>(line)
			})
			.await
	}

	/// Open a server stream of `count` replies.
	pub async fn chat(&mut self, text: &str, count: u32) -> Result<EchoStream<'_>> {
		let request = Request::Chat {
			count,
			text: text.to_string(),
		}
		.to_string();
		let (peer, local) = (self.peer, self.local);
		let io = &mut self.io;

		self.inst
			.streaming(CHAT_METHOD, |ctx| async move {
				ctx.emit(CallEvent::out_header(peer, local));
				io.get_mut().write_all(request.as_bytes()).await?;
				ctx.emit(CallEvent::out_payload());
				Ok::<_, Error>(EchoStream { ctx, io, done: false })
			})
			.await
	}

	pub async fn close(self) -> Result<()> {
		self.io.into_inner().close().await?;
		Ok(())
	}
}

/// Server stream of a `CHAT` request. Emits the call-ended event when the
/// terminator arrives, on error, or when dropped early.
pub struct EchoStream<'a> {
	ctx: CallContext,
	io: &'a mut Io,
	done: bool,
}

impl EchoStream<'_> {
	pub async fn next(&mut self) -> Result<Option<String>> {
		if self.done {
			return Ok(None);
		}

		match read_reply(self.io).await {
			Ok(line) if line == STREAM_END => {
				self.finish();
				Ok(None)
			}
			Ok(line) => {
				self.ctx.emit(CallEvent::in_header());
				self.ctx.emit(CallEvent::in_payload());
				Ok(Some(line))
			}
			Err(e) => {
				self.finish();
				Err(e)
			}
		}
	}

	fn finish(&mut self) {
		if !self.done {
			self.done = true;
			self.ctx.emit(CallEvent::end());
		}
	}
}

impl Drop for EchoStream<'_> {
	fn drop(&mut self) {
		self.finish();
	}
}

async fn read_reply(io: &mut Io) -> Result<String> {
	let mut line = String::new();
	if io.read_line(&mut line).await? == 0 {
		return Err(Error::Disconnected);
	}
	let line = line.trim_end_matches(['\r', '\n']);
	match line.strip_prefix("ERR ") {
		Some(reason) => Err(Error::Protocol(reason.to_string())),
		None => Ok(line.to_string()),
	}
}
