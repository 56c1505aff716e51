//! Basic usage: start, acquire, release, inspect

use async_resource_pool::{Factory, Pool, PoolConfiguration, ResourceStatus};
use async_trait::async_trait;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Stand-in for a database connection
#[derive(Debug)]
struct Connection {
    id: u32,
    queries: u32,
}

struct Connector {
    next_id: AtomicU32,
}

#[async_trait]
impl Factory for Connector {
    type Resource = Connection;
    type Error = Infallible;

    async fn create(&self) -> Result<Connection, Infallible> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("   Opening connection {}", id);
        Ok(Connection { id, queries: 0 })
    }

    async fn destroy(&self, connection: Connection) -> Result<(), Infallible> {
        println!("   Closing connection {} after {} queries", connection.id, connection.queries);
        Ok(())
    }

    async fn validate(&self, connection: &mut Connection) -> bool {
        connection.queries < 3
    }
}

#[tokio::main]
async fn main() {
    println!("=== async_resource_pool - Basic Examples ===\n");

    let pool = Pool::new(
        Connector { next_id: AtomicU32::new(1) },
        PoolConfiguration::new(3)
            .with_min_size(2)
            .with_acquire_timeout(Duration::from_millis(200)),
    )
    .unwrap();

    println!("1. Start:");
    pool.start().await.unwrap();
    println!("   Available: {}\n", pool.available_count().await.unwrap());

    println!("2. Acquire and release:");
    for _ in 0..4 {
        let mut connection = pool.acquire().await.unwrap();
        connection.queries += 1;
        println!("   Ran a query on connection {}", connection.id);
        pool.release(connection).await.unwrap();
    }
    println!();

    println!("3. Automatic return on drop:");
    {
        let connection = pool.acquire().await.unwrap();
        println!("   Lent: {}", pool.count_by_status(ResourceStatus::Lent).await.unwrap());
        println!("   Holding connection {}", connection.id);
    }
    println!("   Lent after drop: {}\n", pool.count_by_status(ResourceStatus::Lent).await.unwrap());

    println!("4. Exhausting the pool:");
    let held: Vec<_> = acquire_many(&pool, 3).await;
    match pool.acquire().await {
        Ok(_) => println!("   Got a fourth connection"),
        Err(e) => println!("   Error: {}", e),
    }
    drop(held);
    println!();

    println!("5. Metrics:");
    let metrics = pool.metrics().await.unwrap();
    let mut exported: Vec<_> = metrics.export().into_iter().collect();
    exported.sort();
    for (name, value) in exported {
        println!("   {}: {}", name, value);
    }

    pool.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn acquire_many(
    pool: &Pool<Connector>,
    count: usize,
) -> Vec<async_resource_pool::Pooled<Connection>> {
    let mut held = Vec::new();
    for _ in 0..count {
        if let Ok(connection) = pool.acquire().await {
            held.push(connection);
        }
    }
    held
}
