//! Single-resume promises.
//!
//! A [`resumption`] pair lets one side park until the other hands it exactly
//! one value. The [`Resumer`] may be called from any context (inside a lock,
//! from a spawned task, from a plain function); the [`Suspension`] is awaited
//! by the parked side.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::future::FusedFuture;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::warn;

/// Create a connected resume/suspend pair.
pub fn resumption<T>() -> (Resumer<T>, Suspension<T>) {
  let (sender, receiver) = oneshot::channel();
  (
    Resumer {
      sender: Mutex::new(Some(sender)),
    },
    Suspension {
      receiver: Some(receiver),
    },
  )
}

/// Failure to resume. The rejected value is handed back.
#[derive(Debug, Error)]
pub enum ResumeError<T> {
  /// The promise was already resumed once.
  #[error("resumption already completed")]
  AlreadyResumed(T),

  /// Nobody is waiting on the other side any more.
  #[error("suspended side is gone")]
  Detached(T),
}

impl<T> ResumeError<T> {
  pub fn into_inner(self) -> T {
    match self {
      Self::AlreadyResumed(value) | Self::Detached(value) => value,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SuspendError {
  /// The resumer was dropped without resuming.
  #[error("resumer dropped without resuming")]
  Abandoned,

  /// The suspension already produced its value.
  #[error("suspension awaited after completion")]
  Consumed,
}

/// The resuming half of a [`resumption`] pair.
#[derive(Debug)]
pub struct Resumer<T> {
  sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Resumer<T> {
  /// Wake the suspended side with `value`.
  ///
  /// Only the first call delivers; later calls return
  /// [`ResumeError::AlreadyResumed`].
  pub fn resume(&self, value: T) -> Result<(), ResumeError<T>> {
    let sender = self
      .sender
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();

    match sender {
      Some(sender) => sender.send(value).map_err(ResumeError::Detached),
      None => {
        warn!("resumption resumed twice");
        Err(ResumeError::AlreadyResumed(value))
      }
    }
  }

  pub fn is_resumed(&self) -> bool {
    self
      .sender
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_none()
  }

  /// True when the suspension has been dropped.
  pub fn is_detached(&self) -> bool {
    self
      .sender
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .is_some_and(|sender| sender.is_closed())
  }
}

/// The awaiting half of a [`resumption`] pair.
#[derive(Debug)]
pub struct Suspension<T> {
  receiver: Option<oneshot::Receiver<T>>,
}

impl<T> Future for Suspension<T> {
  type Output = Result<T, SuspendError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let Some(receiver) = self.receiver.as_mut() else {
      return Poll::Ready(Err(SuspendError::Consumed));
    };

    let result = match Pin::new(receiver).poll(cx) {
      Poll::Pending => return Poll::Pending,
      Poll::Ready(result) => result.map_err(|_| SuspendError::Abandoned),
    };
    self.receiver = None;
    Poll::Ready(result)
  }
}

impl<T> FusedFuture for Suspension<T> {
  fn is_terminated(&self) -> bool {
    self.receiver.is_none()
  }
}
