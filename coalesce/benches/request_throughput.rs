use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fibre_coalesce::Coalescer;
use futures_util::future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

const REQUESTS_PER_ITER: u64 = 10_000;

fn build_coalescer(rt: &Runtime, max_batch_size: usize, cached: bool) -> Arc<Coalescer<u64, u64, String>> {
  let _guard = rt.enter();
  let builder = Coalescer::builder()
    .debounce(Duration::from_micros(200))
    .max_batch_size(max_batch_size)
    .async_batch_fn(|keys: Vec<u64>| async move {
      Ok::<_, String>(keys.into_iter().map(|key| key.wrapping_mul(31)).collect::<Vec<u64>>())
    });
  let builder = if cached { builder.map_cache() } else { builder };
  Arc::new(builder.build().unwrap())
}

/// Many concurrent requests over a small key space, so most of them coalesce.
fn bench_coalesced_requests(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let mut group = c.benchmark_group("coalesced_requests");
  group.throughput(Throughput::Elements(REQUESTS_PER_ITER));

  for max_batch_size in [64usize, 1000] {
    let coalescer = build_coalescer(&rt, max_batch_size, false);
    group.bench_with_input(
      BenchmarkId::new("max_batch_size", max_batch_size),
      &max_batch_size,
      |b, _| {
        b.iter_custom(|iters| {
          let start = Instant::now();
          for _ in 0..iters {
            rt.block_on(async {
              let pendings = (0..REQUESTS_PER_ITER).map(|i| coalescer.request(i % 512));
              for result in future::join_all(pendings).await {
                black_box(result.unwrap());
              }
            });
          }
          start.elapsed()
        })
      },
    );
  }
  group.finish();
}

/// Requests that are all answered from a warm result cache.
fn bench_cached_requests(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let coalescer = build_coalescer(&rt, 1000, true);
  rt.block_on(future::join_all((0..512).map(|key| coalescer.request(key))));

  let mut group = c.benchmark_group("cached_requests");
  group.throughput(Throughput::Elements(1));
  group.bench_function("hit", |b| {
    let mut key = 0u64;
    b.iter(|| {
      key = (key + 1) % 512;
      black_box(coalescer.request(key).try_result())
    })
  });
  group.finish();
}

criterion_group!(benches, bench_coalesced_requests, bench_cached_requests);
criterion_main!(benches);
