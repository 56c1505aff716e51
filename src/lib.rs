//! # async_resource_pool
//!
//! Generic, asynchronous pool for expensive resources such as network
//! connections, built on Tokio.
//!
//! ## Features
//!
//! - Minimum and maximum population, kept up automatically
//! - Validation of resources on borrow and on release
//! - Bounded queue of waiting acquires with per-request timeouts
//! - Fail-fast backpressure once the waiting queue is full
//! - Orderly shutdown while resources are still on loan
//! - Automatic return of resources via RAII (Drop trait)
//! - Metrics, Prometheus export and health reporting
//!
//! All pool state is owned by a single engine task; callers talk to it
//! through messages, so no lock guards the pool's registries.
//!
//! ## Quick Start
//!
//! ```rust
//! use async_resource_pool::{Factory, Pool, PoolConfiguration};
//! use async_trait::async_trait;
//! use std::convert::Infallible;
//!
//! struct Sessions;
//!
//! #[async_trait]
//! impl Factory for Sessions {
//!     type Resource = String;
//!     type Error = Infallible;
//!
//!     async fn create(&self) -> Result<String, Infallible> {
//!         Ok("session".to_string())
//!     }
//!
//!     async fn destroy(&self, _session: String) -> Result<(), Infallible> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = Pool::new(Sessions, PoolConfiguration::new(8)).unwrap();
//! pool.start().await.unwrap();
//! {
//!     let session = pool.acquire().await.unwrap();
//!     println!("Got: {}", *session);
//!     // Session automatically returned when `session` goes out of scope
//! }
//! pool.stop().await.unwrap();
//! # }
//! ```

mod config;
mod engine;
mod errors;
mod factory;
mod health;
mod metrics;
mod pool;
mod request;
mod resource;
mod ring_buffer;

pub use config::PoolConfiguration;
pub use errors::{BoxError, PoolError, PoolResult};
pub use factory::Factory;
pub use health::HealthStatus;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{Pool, PoolStats, PoolStatus, Pooled};
pub use resource::{ResourceId, ResourceStatus};
pub use ring_buffer::RingBuffer;
