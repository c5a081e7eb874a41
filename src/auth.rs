//! Bearer-token resolution for stream requests.
//!
//! Either a fixed token or an async resolver invoked before every attempt,
//! so refreshed credentials are picked up on the next reconnect.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::StreamError;

/// Async token resolver. Invoked once per connection attempt.
pub type TokenResolver =
    Arc<dyn Fn() -> BoxFuture<'static, Result<String, StreamError>> + Send + Sync>;

/// Source of the `Authorization: Bearer <token>` header.
#[derive(Clone)]
pub enum AuthProvider {
    /// A fixed token string.
    Static(String),
    /// A resolver called before each attempt.
    Resolver(TokenResolver),
}

impl AuthProvider {
    /// Build a provider from a fixed token.
    pub fn token(token: impl Into<String>) -> Self {
        AuthProvider::Static(token.into())
    }

    /// Build a provider from an async resolver closure.
    pub fn resolver<F, Fut>(resolve: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, StreamError>> + Send + 'static,
    {
        AuthProvider::Resolver(Arc::new(move || Box::pin(resolve())))
    }

    /// Resolve the current token.
    pub async fn resolve(&self) -> Result<String, StreamError> {
        match self {
            AuthProvider::Static(token) => Ok(token.clone()),
            AuthProvider::Resolver(resolve) => resolve().await,
        }
    }

    /// Resolve the full `Authorization` header value.
    pub async fn header_value(&self) -> Result<String, StreamError> {
        Ok(format!("Bearer {}", self.resolve().await?))
    }
}

impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProvider::Static(_) => f.write_str("AuthProvider::Static(..)"),
            AuthProvider::Resolver(_) => f.write_str("AuthProvider::Resolver(..)"),
        }
    }
}
