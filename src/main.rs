// async_resource_pool demo binary
// The library lives in lib.rs; run the demos with: cargo run --example basic

use async_resource_pool::{Factory, Pool, PoolConfiguration, PoolResult};
use async_trait::async_trait;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};

struct Tickets {
    next: AtomicU32,
}

#[async_trait]
impl Factory for Tickets {
    type Resource = u32;
    type Error = Infallible;

    async fn create(&self) -> Result<u32, Infallible> {
        Ok(self.next.fetch_add(1, Ordering::Relaxed))
    }

    async fn destroy(&self, ticket: u32) -> Result<(), Infallible> {
        println!("  Destroyed ticket {}", ticket);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> PoolResult<()> {
    tracing_subscriber::fmt::init();

    println!("=== async_resource_pool ===");
    println!("See demos/ for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    println!("Quick Demo:");
    let pool = Pool::new(
        Tickets { next: AtomicU32::new(1) },
        PoolConfiguration::new(3).with_min_size(2),
    )?;
    pool.start().await?;

    {
        let ticket = pool.acquire().await?;
        println!("  Got ticket: {}", *ticket);
    }

    println!("  Available after return: {}", pool.available_count().await?);
    pool.stop().await?;
    tokio::task::yield_now().await;
    Ok(())
}
