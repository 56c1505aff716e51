use async_resource_pool::{Factory, Pool, PoolConfiguration, RingBuffer};
use async_trait::async_trait;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::convert::Infallible;

struct Numbers;

#[async_trait]
impl Factory for Numbers {
    type Resource = u64;
    type Error = Infallible;

    async fn create(&self) -> Result<u64, Infallible> {
        Ok(7)
    }

    async fn destroy(&self, _resource: u64) -> Result<(), Infallible> {
        Ok(())
    }
}

fn ring_buffer(c: &mut Criterion) {
    c.bench_function("ring_buffer_push_shift", |b| {
        let mut buffer = RingBuffer::new(64);
        b.iter(|| {
            for value in 0..64u64 {
                buffer.push(black_box(value)).unwrap();
            }
            while let Some(value) = buffer.shift() {
                black_box(value);
            }
        })
    });

    c.bench_function("ring_buffer_fast_remove", |b| {
        let mut buffer = RingBuffer::new(64);
        b.iter(|| {
            for value in 0..64u64 {
                buffer.push(value).unwrap();
            }
            for value in (0..64u64).rev().step_by(3) {
                buffer.fast_remove(black_box(&value));
            }
            while buffer.pop().is_some() {}
        })
    });
}

fn acquire_release(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let pool = runtime.block_on(async {
        let pool = Pool::new(
            Numbers,
            PoolConfiguration::new(8).with_min_size(8).with_test_on_borrow(false),
        )
        .unwrap();
        pool.start().await.unwrap();
        pool
    });

    c.bench_function("acquire_release", |b| {
        b.to_async(&runtime).iter(|| async {
            let resource = pool.acquire().await.unwrap();
            pool.release(black_box(resource)).await.unwrap();
        })
    });
}

criterion_group!(benches, ring_buffer, acquire_release);
criterion_main!(benches);
