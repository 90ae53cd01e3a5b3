//! Throughput benchmarks for sentinel demultiplexing

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nanoclaw_bridge::subprocess::streaming::{
    FnOutputHandler, SentinelMarkers, StreamOutputDemux,
};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Container output with `events` payloads, each preceded by some log noise
fn create_stream(events: usize, noise_lines: usize) -> String {
    let markers = SentinelMarkers::default();
    let mut stream = String::new();
    for i in 0..events {
        for line in 0..noise_lines {
            stream.push_str(&format!("[agent] step {i}.{line}: reading files - ok\n"));
        }
        stream.push_str(&markers.wrap(&format!(
            r#"{{"status":"success","result":"answer {i}","newSessionId":"session-{i}"}}"#
        )));
    }
    stream
}

fn bench_feed_chunk_sizes(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let stream = create_stream(100, 20);

    let mut group = c.benchmark_group("demux_feed");
    group
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(5))
        .throughput(Throughput::Bytes(stream.len() as u64));

    for chunk_size in [64usize, 1024, 8192] {
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.to_async(&runtime).iter(|| async {
                    let handler = Arc::new(FnOutputHandler::new(|event| async move {
                        black_box(event);
                        Ok(())
                    }));
                    let mut demux = StreamOutputDemux::new(handler);
                    for chunk in stream.as_bytes().chunks(chunk_size) {
                        demux.feed_bytes(chunk);
                    }
                    demux.finish();
                    demux.settled().await.unwrap();
                    black_box(demux.events_extracted())
                });
            },
        );
    }
    group.finish();
}

fn bench_marker_free_noise(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let noise = "compiling dependency graph - 42% -\n".repeat(2000);

    c.benchmark_group("demux_noise")
        .throughput(Throughput::Bytes(noise.len() as u64))
        .bench_function("noise_only", |b| {
            b.to_async(&runtime).iter(|| async {
                let handler = Arc::new(FnOutputHandler::new(|_| async { Ok(()) }));
                let mut demux = StreamOutputDemux::new(handler);
                for line in noise.split_inclusive('\n') {
                    demux.feed(line);
                }
                black_box(demux.discarded_bytes())
            });
        });
}

criterion_group!(benches, bench_feed_chunk_sizes, bench_marker_free_noise);
criterion_main!(benches);
