//! # rpc-telemetry
//!
//! Client-side latency breakdown and TCP diagnostics for RPC connections.
//!
//! An [`Instrumentation`] hands out [`CallContext`]s through its interceptor
//! methods. The transport reports lifecycle events into the context, and every
//! call is finalized exactly once into five histograms:
//!
//! | instrument                    | span                                        |
//! |-------------------------------|---------------------------------------------|
//! | `<prefix>.call_total_ms`      | start until end (first response for streams) |
//! | `<prefix>.stream_establish_ms`| start until request headers sent            |
//! | `<prefix>.send_stall_ms`      | headers sent until request payload sent     |
//! | `<prefix>.response_wait_ms`   | request payload sent until response         |
//! | `<prefix>.attempts_per_call`  | transport attempts                          |
//!
//! Connections opened through [`Instrumentation::dial`] (or wrapped with
//! [`Instrumentation::wrap_conn`]) are registered for periodic `TCP_INFO`
//! sampling. Sampling runs on one background task behind a bounded queue, a
//! global rate limit and a per-connection cooldown, and records
//! `<prefix>.tcp_rtt_ms`, `<prefix>.tcp_cwnd` and `<prefix>.tcp_retrans_delta`.
//!
//! ```rust,ignore
//! let inst = Instrumentation::new(TelemetryConfig::from_env()?)?;
//! let conn = inst.dial("10.0.0.5:50051").await?;
//!
//! let reply = inst
//!     .unary("/echo.Echo/Say", |ctx| async move {
//!         ctx.emit(CallEvent::out_header(conn.get_ref().peer_addr().ok(), None));
//!         // write request, read reply, emitting events as they happen
//!         ctx.emit(CallEvent::end());
//!         Ok::<_, std::io::Error>(())
//!     })
//!     .await;
//!
//! inst.shutdown().await;
//! ```

pub mod call;
mod clock;
pub mod config;
pub mod conn;
pub mod diag;
mod error;
mod instrumentation;
pub mod metrics;

pub use call::{CallContext, CallDurations, CallEvent, CallKind, CallOutcome, Interceptor};
pub use clock::MonotonicClock;
pub use config::{default_config, set_default_config, LoadBalancingPolicy, SamplingPolicy, TelemetryConfig};
pub use conn::{ConnRegistry, TrackedConn, TransportConn};
pub use diag::{DiagnosticsProbe, TcpInfoSummary};
pub use error::{Result, TelemetryError};
pub use instrumentation::{Instrumentation, ShutdownReport};
pub use metrics::{Instrument, MetricSink, OtelSink};
