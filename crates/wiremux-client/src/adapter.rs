//! Endpoint resolution seam.
//!
//! An adapter turns caller-held credentials or configuration into the
//! connection URL (and optional metadata) used by
//! [`Client::connect`](crate::Client::connect). Whether resolution means a
//! metadata HTTP call or a static config entry is the caller's business; the
//! client only consumes the result.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

/// Adapter error.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("endpoint resolution failed: {0}")]
    Resolution(String),
}

/// Result of endpoint resolution.
#[derive(Debug, Clone, Default)]
pub struct AdapterResult {
    /// Connection URL; overrides any configured URL when present.
    pub url: Option<String>,
    /// Auxiliary metadata (credentials, cluster info) for the caller's use.
    pub metadata: Option<serde_json::Value>,
}

impl AdapterResult {
    /// Result carrying just a URL.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            metadata: None,
        }
    }
}

/// Trait for resolving the transport endpoint.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Resolve the endpoint.
    ///
    /// # Errors
    /// Returns an error if resolution fails; this surfaces as a
    /// [`connect`](crate::Client::connect) failure.
    async fn resolve(&self) -> Result<AdapterResult, AdapterError>;
}

/// Adapter that always resolves to a fixed URL.
#[derive(Debug, Clone)]
pub struct StaticAdapter {
    url: String,
}

impl StaticAdapter {
    /// Create an adapter for a fixed endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Adapter for StaticAdapter {
    async fn resolve(&self) -> Result<AdapterResult, AdapterError> {
        Ok(AdapterResult::with_url(self.url.clone()))
    }
}

/// Wrap an async closure as an [`Adapter`].
pub fn from_fn<F, Fut>(f: F) -> FnAdapter<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<AdapterResult, AdapterError>> + Send,
{
    FnAdapter { f }
}

/// See [`from_fn`].
pub struct FnAdapter<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Adapter for FnAdapter<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<AdapterResult, AdapterError>> + Send,
{
    async fn resolve(&self) -> Result<AdapterResult, AdapterError> {
        (self.f)().await
    }
}
