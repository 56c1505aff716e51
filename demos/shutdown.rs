//! Shutting down while work is still in flight

use async_resource_pool::{Factory, Pool, PoolConfiguration};
use async_trait::async_trait;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::sleep;

struct Workers {
    next_id: AtomicU32,
}

#[async_trait]
impl Factory for Workers {
    type Resource = u32;
    type Error = Infallible;

    async fn create(&self) -> Result<u32, Infallible> {
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn destroy(&self, worker: u32) -> Result<(), Infallible> {
        println!("   Destroyed worker {}", worker);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    println!("=== async_resource_pool - Shutdown ===\n");

    let pool = Pool::new(
        Workers { next_id: AtomicU32::new(1) },
        PoolConfiguration::new(4)
            .with_min_size(4)
            .with_acquire_timeout(Duration::from_secs(2)),
    )
    .unwrap();
    pool.start().await.unwrap();

    let mut handles = vec![];
    for task in 0..6 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            match pool.acquire().await {
                Ok(worker) => {
                    println!("   Task {} got worker {}", task, *worker);
                    sleep(Duration::from_millis(100)).await;
                    if let Err(e) = pool.release(worker).await {
                        println!("   Task {} release failed: {}", task, e);
                    }
                }
                Err(e) => println!("   Task {} couldn't get a worker: {}", task, e),
            }
        }));
    }

    sleep(Duration::from_millis(20)).await;
    println!("1. Stopping with {} workers lent", pool.stats().await.unwrap().lent());
    pool.stop().await.unwrap();
    println!("   Pool status: {:?}", pool.status().await.unwrap());

    for handle in handles {
        handle.await.unwrap();
    }

    println!("2. After every task returned its worker:");
    println!("   Pool size: {}", pool.size().await.unwrap());
    let metrics = pool.metrics().await.unwrap();
    println!("   Destroyed: {}", metrics.total_destroyed);
}
