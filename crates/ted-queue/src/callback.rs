//! Projection callback contract.

use std::future::Future;

use async_trait::async_trait;
use ted_common::DocumentPath;
use thiserror::Error;

/// Failure reported by a projection callback. Only the description is kept; it is logged and
/// the task is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Recomputes and persists derived state for one task path.
///
/// Tasks are delivered at least once and in no guaranteed order, so implementations must be
/// idempotent: the same path may be projected twice, or after a newer write to it.
#[async_trait]
pub trait ProjectionCallback: Send + Sync {
    async fn project(&self, path: &DocumentPath) -> Result<(), CallbackError>;
}

/// Adapter turning an async closure into a [`ProjectionCallback`].
pub struct FnProjection<F>(F);

pub fn projection_fn<F, Fut>(f: F) -> FnProjection<F>
where
    F: Fn(DocumentPath) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), CallbackError>> + Send,
{
    FnProjection(f)
}

#[async_trait]
impl<F, Fut> ProjectionCallback for FnProjection<F>
where
    F: Fn(DocumentPath) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), CallbackError>> + Send,
{
    async fn project(&self, path: &DocumentPath) -> Result<(), CallbackError> {
        (self.0)(path.clone()).await
    }
}
