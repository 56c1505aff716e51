//! The factory collaborator that produces pooled resources

use async_trait::async_trait;

/// Creates, validates and destroys the resources a pool manages.
///
/// # Examples
///
/// ```
/// use async_resource_pool::Factory;
/// use async_trait::async_trait;
/// use std::convert::Infallible;
///
/// struct Counter;
///
/// #[async_trait]
/// impl Factory for Counter {
///     type Resource = u32;
///     type Error = Infallible;
///
///     async fn create(&self) -> Result<u32, Infallible> {
///         Ok(0)
///     }
///
///     async fn destroy(&self, _resource: u32) -> Result<(), Infallible> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    /// The pooled resource type
    type Resource: Send + 'static;

    /// Error surfaced by `create` and `destroy`
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce a new resource
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Release a resource for good. Failures are logged by the pool.
    async fn destroy(&self, resource: Self::Resource) -> Result<(), Self::Error>;

    /// Check whether a resource is still usable
    async fn validate(&self, _resource: &mut Self::Resource) -> bool {
        true
    }
}
