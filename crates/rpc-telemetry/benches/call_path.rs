use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use opentelemetry::KeyValue;
use rpc_telemetry::{CallEvent, Instrument, Instrumentation, MetricSink, TelemetryConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Runtime;

struct NullSink;

impl MetricSink for NullSink {
	fn record(&self, instrument: Instrument, value: f64, attributes: &[KeyValue]) {
		black_box((instrument, value, attributes.len()));
	}
}

fn instrumentation(rt: &Runtime) -> Arc<Instrumentation> {
	let _guard = rt.enter();
	Arc::new(Instrumentation::with_sink(TelemetryConfig::default(), Arc::new(NullSink)).unwrap())
}

// One unary call with the full event sequence
fn bench_unary_sequential(c: &mut Criterion) {
	let rt = Runtime::new().unwrap();
	let inst = instrumentation(&rt);
	let remote: Option<SocketAddr> = "10.0.0.2:443".parse().ok();

	c.bench_function("unary_sequential", |b| {
		b.to_async(&rt).iter(|| async {
			let result = inst
				.unary("/bench.Bench/Call", |ctx| async move {
					ctx.emit(CallEvent::out_header(remote, None));
					ctx.emit(CallEvent::out_payload());
					ctx.emit(CallEvent::in_header());
					ctx.emit(CallEvent::in_payload());
					ctx.emit(CallEvent::end());
					Ok::<_, ()>(())
				})
				.await;
			black_box(result)
		});
	});
}

// Concurrent calls contending on the pool and label caches
fn bench_unary_concurrent(c: &mut Criterion) {
	let mut group = c.benchmark_group("unary_concurrent");
	let rt = Runtime::new().unwrap();
	let inst = instrumentation(&rt);

	for concurrent in [8, 64, 256].iter() {
		group.throughput(Throughput::Elements(*concurrent as u64));
		group.bench_with_input(BenchmarkId::from_parameter(concurrent), concurrent, |b, &n| {
			b.to_async(&rt).iter(|| {
				let inst = Arc::clone(&inst);
				async move {
					let handles: Vec<_> = (0..n)
						.map(|i| {
							let inst = Arc::clone(&inst);
							tokio::spawn(async move {
								let method = format!("/bench.Bench/M{}", i % 16);
								inst.unary(&method, |ctx| async move {
									ctx.emit(CallEvent::out_header(None, None));
									ctx.emit(CallEvent::end());
									Ok::<_, ()>(())
								})
								.await
							})
						})
						.collect();
					black_box(futures::future::join_all(handles).await);
				}
			});
		});
	}
	group.finish();
}

fn bench_streaming_end(c: &mut Criterion) {
	let rt = Runtime::new().unwrap();
	let inst = instrumentation(&rt);

	c.bench_function("streaming_end", |b| {
		b.to_async(&rt).iter(|| async {
			let stream = inst.streaming("/bench.Bench/Stream", |ctx| async move { Ok::<_, ()>(ctx) }).await.unwrap();
			stream.emit(CallEvent::out_header(None, None));
			stream.emit(CallEvent::in_payload());
			black_box(stream.emit(CallEvent::end()))
		});
	});
}

criterion_group!(benches, bench_unary_sequential, bench_unary_concurrent, bench_streaming_end);
criterion_main!(benches);
