//! Consumer handles.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use cohort_core::{BoxSequence, Sequence, Suspension, WorkError, resumption, run_hooks};
use futures::Stream;
use futures::future::poll_fn;
use tracing::debug;

use crate::registry::{SharedRegistry, Step, lock};

/// A consumer of a [`BroadcastSequence`](crate::BroadcastSequence).
///
/// Pull with [`next`](Self::next) or use it as a [`Stream`]. Dropping the
/// iterator (or calling [`cancel`](Self::cancel)) removes its slot and
/// discards anything still buffered for it.
pub struct BroadcastIterator<T, E> {
  registry: SharedRegistry<T, E>,
  id: u64,
  waiting: Option<Suspension<Step<T, E>>>,
  cancelled: bool,
  cancel_reported: bool,
  detached: bool,
}

impl<T, E> BroadcastIterator<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  pub(crate) fn new(registry: SharedRegistry<T, E>, id: u64) -> Self {
    Self {
      registry,
      id,
      waiting: None,
      cancelled: false,
      cancel_reported: false,
      detached: false,
    }
  }

  /// This consumer's id within its sequence.
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Pull the next element.
  ///
  /// Returns `Ok(None)` once the producer has finished. A producer failure is
  /// returned once, after which this consumer reads as finished. The first
  /// pull on the whole sequence starts the producer.
  pub async fn next(&mut self) -> Result<Option<T>, WorkError<E>> {
    poll_fn(|cx| self.poll_step(cx)).await
  }

  /// Leave the sequence. The next pull fails with [`WorkError::Cancelled`],
  /// every pull after that returns `Ok(None)`.
  pub fn cancel(&mut self) {
    self.cancelled = true;
    self.detach();
  }

  pub fn into_boxed(self) -> BoxSequence<T, E> {
    Box::new(self)
  }

  fn poll_step(&mut self, cx: &mut Context<'_>) -> Poll<Step<T, E>> {
    if self.cancelled {
      return Poll::Ready(self.cancelled_step());
    }

    if self.waiting.is_none() {
      let mut registry = lock(&self.registry);
      let Some(slot) = registry.slot_mut(self.id) else {
        return Poll::Ready(Ok(None));
      };
      if let Some(step) = slot.take_ready() {
        return Poll::Ready(step);
      }

      let (resumer, suspension) = resumption();
      if slot.park(resumer).is_some() {
        // Another live pull owns this slot; nothing can be delivered here.
        return Poll::Ready(Ok(None));
      }
      registry.start(&self.registry);
      self.waiting = Some(suspension);
    }

    let Some(suspension) = self.waiting.as_mut() else {
      return Poll::Pending;
    };
    let resumed = match Pin::new(suspension).poll(cx) {
      Poll::Pending => return Poll::Pending,
      Poll::Ready(resumed) => resumed,
    };
    self.waiting = None;

    Poll::Ready(resumed.unwrap_or_else(|err| {
      debug!(consumer_id = self.id, error = %err, "pull abandoned");
      Ok(None)
    }))
  }
}

impl<T, E> BroadcastIterator<T, E> {
  fn cancelled_step(&mut self) -> Step<T, E> {
    if std::mem::replace(&mut self.cancel_reported, true) {
      Ok(None)
    } else {
      Err(WorkError::Cancelled)
    }
  }

  fn detach(&mut self) {
    if self.detached {
      return;
    }
    self.detached = true;
    self.waiting = None;

    let hooks = lock(&self.registry).unregister(self.id);
    run_hooks(hooks);
  }
}

impl<T, E> Drop for BroadcastIterator<T, E> {
  fn drop(&mut self) {
    self.detach();
  }
}

impl<T, E> Stream for BroadcastIterator<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  type Item = Result<T, WorkError<E>>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.get_mut().poll_step(cx).map(Result::transpose)
  }
}

#[async_trait]
impl<T, E> Sequence for BroadcastIterator<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  type Item = T;
  type Error = E;

  async fn next(&mut self) -> Result<Option<T>, WorkError<E>> {
    BroadcastIterator::next(self).await
  }
}
