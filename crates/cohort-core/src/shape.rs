//! The two shapes every cohort operator consumes and produces.
//!
//! Adapters (map, retry, timeout, decode...) wrap an upstream [`Work`] and
//! expose a new [`Work`], forwarding `cancel()` upstream. Sequence adapters do
//! the same with [`Sequence`]. The boxed aliases are the erased forms used
//! where a single concrete type is required.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkError;

/// A cold, cancellable, single-shot asynchronous computation.
#[async_trait]
pub trait Work: Send + Sync {
  type Output: Send + 'static;
  type Error: Send + 'static;

  /// Drive the computation and wait for its outcome.
  async fn execute(&self) -> Result<Self::Output, WorkError<Self::Error>>;

  /// Cancel the computation. Idempotent.
  fn cancel(&self);
}

/// A pull-based asynchronous sequence.
///
/// `Ok(None)` is terminal: once returned, every later pull returns it too.
#[async_trait]
pub trait Sequence: Send {
  type Item: Send + 'static;
  type Error: Send + 'static;

  async fn next(&mut self) -> Result<Option<Self::Item>, WorkError<Self::Error>>;
}

/// Type-erased [`Work`].
pub type BoxWork<T, E> = Arc<dyn Work<Output = T, Error = E>>;

/// Type-erased [`Sequence`].
pub type BoxSequence<T, E> = Box<dyn Sequence<Item = T, Error = E>>;

#[async_trait]
impl<W> Work for Arc<W>
where
  W: Work + ?Sized,
{
  type Output = W::Output;
  type Error = W::Error;

  async fn execute(&self) -> Result<Self::Output, WorkError<Self::Error>> {
    (**self).execute().await
  }

  fn cancel(&self) {
    (**self).cancel();
  }
}

#[async_trait]
impl<S> Sequence for Box<S>
where
  S: Sequence + ?Sized,
{
  type Item = S::Item;
  type Error = S::Error;

  async fn next(&mut self) -> Result<Option<Self::Item>, WorkError<Self::Error>> {
    (**self).next().await
  }
}
