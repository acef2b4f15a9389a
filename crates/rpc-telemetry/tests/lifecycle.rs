#[cfg(test)]
mod tests {
	use opentelemetry::KeyValue;
	use rpc_telemetry::{CallEvent, Instrument, Instrumentation, MetricSink, TelemetryConfig, TelemetryError};
	use std::sync::{Arc, Mutex};
	use std::time::Duration;
	use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
	use tokio::net::TcpListener;

	#[derive(Default)]
	struct RecordingSink {
		records: Mutex<Vec<(Instrument, f64, Vec<String>)>>,
	}

	impl RecordingSink {
		fn count(&self, instrument: Instrument) -> usize {
			self.records.lock().unwrap().iter().filter(|(i, ..)| *i == instrument).count()
		}

		fn labels(&self, instrument: Instrument) -> Vec<Vec<String>> {
			self.records.lock().unwrap().iter().filter(|(i, ..)| *i == instrument).map(|(.., l)| l.clone()).collect()
		}
	}

	impl MetricSink for RecordingSink {
		fn record(&self, instrument: Instrument, value: f64, attributes: &[KeyValue]) {
			let labels = attributes.iter().map(|kv| format!("{}={}", kv.key, kv.value)).collect();
			self.records.lock().unwrap().push((instrument, value, labels));
		}
	}

	fn config() -> TelemetryConfig {
		TelemetryConfig {
			metric_prefix: "test".to_string(),
			..TelemetryConfig::default()
		}
	}

	fn instrumentation(config: TelemetryConfig) -> (Instrumentation, Arc<RecordingSink>) {
		let sink = Arc::new(RecordingSink::default());
		let inst = Instrumentation::with_sink(config, Arc::clone(&sink) as Arc<dyn MetricSink>).unwrap();
		(inst, sink)
	}

	/// Line echo server that serves every accepted connection until EOF.
	async fn echo_server() -> String {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		tokio::spawn(async move {
			while let Ok((stream, _)) = listener.accept().await {
				tokio::spawn(async move {
					let (read, mut write) = stream.into_split();
					let mut lines = BufReader::new(read).lines();
					while let Ok(Some(line)) = lines.next_line().await {
						if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
							break;
						}
					}
				});
			}
		});
		addr
	}

	#[tokio::test]
	async fn test_dial_registers_until_close() {
		let (inst, _) = instrumentation(config());
		let addr = echo_server().await;

		let conn = inst.dial(&addr).await.unwrap();
		assert_eq!(inst.registry().len(), 1);
		assert_eq!(&**conn.info().remote_ip(), "127.0.0.1");
		assert!(conn.info().key().ends_with(&format!("->{addr}")));

		conn.close().await.unwrap();
		assert!(inst.registry().is_empty());

		inst.shutdown().await;
	}

	#[tokio::test]
	async fn test_dropped_connection_is_deregistered() {
		let (inst, _) = instrumentation(config());
		let addr = echo_server().await;

		let conn = inst.dial(&addr).await.unwrap();
		drop(conn);
		assert!(inst.registry().is_empty());
	}

	#[tokio::test]
	async fn test_dial_failure_is_reported() {
		let (inst, _) = instrumentation(config());
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		drop(listener);

		let err = inst.dial(&addr).await.unwrap_err();
		assert!(matches!(err, TelemetryError::Dial { .. }));
		assert!(inst.registry().is_empty());
	}

	#[tokio::test]
	async fn test_unary_round_trip_is_recorded_once() {
		let (inst, sink) = instrumentation(config());
		let addr = echo_server().await;
		let conn = inst.dial(&addr).await.unwrap();
		let peer = conn.get_ref().peer_addr().ok();
		let local = conn.get_ref().local_addr().ok();
		let mut reader = BufReader::new(conn);
		let io = &mut reader;

		let reply = inst
			.unary("/echo.Echo/Say", |ctx| async move {
				ctx.emit(CallEvent::out_header(peer, local));
				io.get_mut().write_all(b"hello\n").await?;
				ctx.emit(CallEvent::out_payload());

				let mut line = String::new();
				io.read_line(&mut line).await?;
				ctx.emit(CallEvent::in_header());
				ctx.emit(CallEvent::in_payload());
				ctx.emit(CallEvent::end());
				Ok::<_, std::io::Error>(line)
			})
			.await
			.unwrap();

		assert_eq!(reply, "hello\n");
		assert_eq!(sink.count(Instrument::CallTotal), 1);
		assert_eq!(sink.count(Instrument::ResponseWait), 1);
		assert_eq!(sink.labels(Instrument::CallTotal)[0], vec!["method=/echo.Echo/Say".to_string(), "remote_ip=127.0.0.1".to_string()]);
		assert_eq!(inst.pool_stats().outstanding(), 0);

		reader.into_inner().close().await.unwrap();
		assert!(inst.registry().is_empty());
	}

	#[tokio::test]
	async fn test_streaming_finalized_by_end_event() {
		let (inst, sink) = instrumentation(config());

		let stream = inst.streaming("/echo.Echo/Chat", |ctx| async move { Ok::<_, ()>(ctx) }).await.unwrap();
		stream.emit(CallEvent::out_header(None, None));
		stream.emit(CallEvent::out_payload());
		assert_eq!(sink.count(Instrument::CallTotal), 0);

		stream.emit(CallEvent::in_payload());
		stream.emit(CallEvent::end());
		stream.emit(CallEvent::end());
		drop(stream);

		assert_eq!(sink.count(Instrument::CallTotal), 1);
		assert_eq!(sink.labels(Instrument::AttemptsPerCall)[0], vec!["method=/echo.Echo/Chat".to_string(), "remote_ip=unknown".to_string()]);
		assert_eq!(inst.pool_stats().outstanding(), 0);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_calls_each_finalize_once() {
		let (inst, sink) = instrumentation(config());
		let inst = Arc::new(inst);

		let handles: Vec<_> = (0..64)
			.map(|n| {
				let inst = Arc::clone(&inst);
				tokio::spawn(async move {
					inst.unary(&format!("/load.Load/M{}", n % 4), |ctx| async move {
						ctx.emit(CallEvent::out_header("10.0.0.9:443".parse().ok(), None));
						ctx.emit(CallEvent::out_payload());
						tokio::task::yield_now().await;
						ctx.emit(CallEvent::end());
						Ok::<_, ()>(())
					})
					.await
				})
			})
			.collect();

		for result in futures::future::join_all(handles).await {
			assert!(result.unwrap().is_ok());
		}

		assert_eq!(sink.count(Instrument::CallTotal), 64);
		assert_eq!(inst.pool_stats().outstanding(), 0);
		assert_eq!(inst.cached_label_sets(), 4);
	}

	#[cfg(target_os = "linux")]
	#[tokio::test]
	async fn test_requested_sample_records_tcp_metrics() {
		let (inst, sink) = instrumentation(config());
		let addr = echo_server().await;
		let conn = inst.dial(&addr).await.unwrap();
		assert!(conn.info().has_probe());

		assert!(inst.request_sample(conn.info()));
		tokio::time::timeout(Duration::from_secs(5), async {
			while sink.count(Instrument::TcpRtt) == 0 {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.unwrap();

		assert_eq!(sink.labels(Instrument::TcpCwnd)[0], vec!["remote_ip=127.0.0.1".to_string()]);
		assert_eq!(sink.count(Instrument::TcpRetransDelta), 1);

		// within the cooldown a second request records nothing new
		assert!(inst.request_sample(conn.info()));
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(sink.count(Instrument::TcpRtt), 1);

		let report = inst.shutdown().await;
		assert_eq!(report.worker.unwrap().cooling_down, 1);
	}
}
