use super::addr::{ip_from_host_port, UNKNOWN_IP};
use super::registry::{ConnInfo, ConnRegistry, Registration};
use crate::diag::{self, DiagnosticsProbe};
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

/// A transport connection that can be tracked by the registry.
pub trait TransportConn: Send {
	fn local_label(&self) -> String;

	fn peer_label(&self) -> String;

	fn peer_ip(&self) -> Option<IpAddr> {
		ip_from_host_port(&self.peer_label())
	}

	/// Probe reading kernel TCP state for this connection, when there is one.
	///
	/// The probe may read OS handles owned by `self` and must not outlive it.
	/// [`TrackedConn`] detaches it before the connection is dropped.
	fn diagnostics_probe(&self) -> Option<Box<dyn DiagnosticsProbe>> {
		None
	}
}

impl TransportConn for TcpStream {
	fn local_label(&self) -> String {
		self.local_addr().map_or_else(|_| UNKNOWN_IP.to_string(), |addr| addr.to_string())
	}

	fn peer_label(&self) -> String {
		self.peer_addr().map_or_else(|_| UNKNOWN_IP.to_string(), |addr| addr.to_string())
	}

	fn peer_ip(&self) -> Option<IpAddr> {
		self.peer_addr().ok().and_then(|addr| ip_from_host_port(&addr.to_string()))
	}

	fn diagnostics_probe(&self) -> Option<Box<dyn DiagnosticsProbe>> {
		diag::probe_for(self)
	}
}

/// Connection wrapper whose lifetime bounds its registry entry.
///
/// `registration` is declared before `inner` so the entry and its probe are
/// gone before the socket is dropped.
#[derive(Debug)]
pub struct TrackedConn<C> {
	registration: Registration,
	inner: C,
}

impl<C: TransportConn> TrackedConn<C> {
	pub fn new(inner: C, registry: &ConnRegistry) -> Self {
		let remote_ip: Arc<str> = inner.peer_ip().map_or_else(|| Arc::from(UNKNOWN_IP), |ip| Arc::from(ip.to_string()));
		let registration = registry.register(inner.local_label(), inner.peer_label(), remote_ip, inner.diagnostics_probe());
		Self { registration, inner }
	}
}

impl ConnRegistry {
	/// Register `conn` and hand it back wrapped; dropping or closing the wrapper deregisters.
	pub fn wrap_conn<C: TransportConn>(&self, conn: C) -> TrackedConn<C> {
		TrackedConn::new(conn, self)
	}
}

impl<C> TrackedConn<C> {
	pub const fn info(&self) -> &Arc<ConnInfo> {
		self.registration.info()
	}

	pub const fn get_ref(&self) -> &C {
		&self.inner
	}
}

impl<C: AsyncWrite + Unpin> TrackedConn<C> {
	/// Deregister, flush and shut the write side down, then drop the connection.
	pub async fn close(mut self) -> io::Result<()> {
		self.registration.close();
		self.inner.shutdown().await
	}
}

impl<C: AsyncRead + Unpin> AsyncRead for TrackedConn<C> {
	fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
	}
}

impl<C: AsyncWrite + Unpin> AsyncWrite for TrackedConn<C> {
	fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_flush(cx)
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
	}

	fn poll_write_vectored(self: Pin<&mut Self>, cx: &mut Context<'_>, bufs: &[io::IoSlice<'_>]) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
	}

	fn is_write_vectored(&self) -> bool {
		self.inner.is_write_vectored()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

	struct FakeConn {
		io: DuplexStream,
		peer: &'static str,
	}

	impl TransportConn for FakeConn {
		fn local_label(&self) -> String {
			"10.0.0.1:41000".to_string()
		}

		fn peer_label(&self) -> String {
			self.peer.to_string()
		}
	}

	impl AsyncWrite for FakeConn {
		fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
			Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
		}

		fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
			Pin::new(&mut self.get_mut().io).poll_flush(cx)
		}

		fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
			Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
		}
	}

	#[tokio::test]
	async fn test_close_deregisters_and_shuts_down() {
		let registry = ConnRegistry::new();
		let (client, mut server) = duplex(64);
		let conn = TrackedConn::new(FakeConn { io: client, peer: "10.0.0.2:443" }, &registry);

		assert_eq!(conn.info().key(), "10.0.0.1:41000->10.0.0.2:443");
		assert_eq!(&**conn.info().remote_ip(), "10.0.0.2");
		assert!(!conn.info().has_probe());

		let info = Arc::clone(conn.info());
		conn.close().await.unwrap();
		assert!(registry.is_empty());
		assert!(!info.has_probe());

		let mut buf = Vec::new();
		assert_eq!(server.read_to_end(&mut buf).await.unwrap(), 0);
		let err = server.write_all(b"late").await.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
	}

	#[tokio::test]
	async fn test_unparseable_peer_is_unknown() {
		let registry = ConnRegistry::new();
		let (client, _server) = duplex(64);
		let conn = registry.wrap_conn(FakeConn { io: client, peer: "pipe" });

		assert_eq!(&**conn.info().remote_ip(), UNKNOWN_IP);
		drop(conn);
		assert!(registry.is_empty());
	}

	#[cfg(target_os = "linux")]
	#[tokio::test]
	async fn test_tcp_probe_is_detached_with_the_socket() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
		let _server = accepted.unwrap();

		let registry = ConnRegistry::new();
		let conn = registry.wrap_conn(client.unwrap());
		let info = Arc::clone(conn.info());
		assert!(info.has_probe());

		drop(conn);
		assert!(!info.has_probe());
		assert!(registry.is_empty());
	}
}
