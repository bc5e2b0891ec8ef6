//! Units of work.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cohort_config::Discipline;
use cohort_core::{BoxWork, OnTerminal, TerminalHook, Work, WorkError};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::record::{ExecutionRecord, Operation};

static NEXT_WORK_ID: AtomicU64 = AtomicU64::new(1);

/// A cold description of an asynchronous computation.
///
/// Nothing runs until the work is driven with [`execute`](Self::execute),
/// [`result`](Self::result) or [`run`](Self::run). Clones share one
/// [`ExecutionRecord`], so cancelling any clone cancels all of them.
///
/// How repeated drives behave depends on the [`Discipline`]:
///
/// - `Plain`: each drive spawns an independent invocation.
/// - `Lazy`: the first drive spawns the only invocation there will ever be;
///   its success or failure is returned to every later drive.
/// - `Shared`: drives attach to the in-flight invocation; once it settles the
///   next drive spawns a fresh one.
///
/// Driving spawns onto the current tokio runtime.
pub struct UnitOfWork<T, E> {
  id: u64,
  operation: Operation<T, E>,
  record: Arc<ExecutionRecord<T, E>>,
}

impl<T, E> Clone for UnitOfWork<T, E> {
  fn clone(&self) -> Self {
    Self {
      id: self.id,
      operation: self.operation.clone(),
      record: self.record.clone(),
    }
  }
}

impl<T, E> std::fmt::Debug for UnitOfWork<T, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("UnitOfWork")
      .field("id", &self.id)
      .field("discipline", &self.record.discipline())
      .field("cancelled", &self.record.is_cancelled())
      .finish()
  }
}

impl<T, E> UnitOfWork<T, E>
where
  T: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  /// Create plain work from an operation.
  ///
  /// The operation receives a token that is cancelled when the work is; it
  /// can use it to stop early.
  pub fn new<F, Fut>(operation: F) -> Self
  where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let operation: Operation<T, E> = Arc::new(move |token| operation(token).boxed());
    Self::from_operation(operation, Discipline::Plain)
  }

  /// Create plain work from an operation that ignores cancellation.
  pub fn from_future_fn<F, Fut>(operation: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    Self::new(move |_| operation())
  }

  fn from_operation(operation: Operation<T, E>, discipline: Discipline) -> Self {
    Self {
      id: NEXT_WORK_ID.fetch_add(1, Ordering::Relaxed),
      operation,
      record: Arc::new(ExecutionRecord::new(discipline)),
    }
  }

  /// The same operation under `discipline`, with a fresh record.
  pub fn with_discipline(&self, discipline: Discipline) -> Self {
    Self::from_operation(self.operation.clone(), discipline)
  }

  /// Run-once, remember-forever wrapper.
  pub fn lazy(&self) -> Self {
    self.with_discipline(Discipline::Lazy)
  }

  /// One invocation per wave of concurrent drives.
  pub fn shared(&self) -> Self {
    self.with_discipline(Discipline::Shared)
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn discipline(&self) -> Discipline {
    self.record.discipline()
  }

  pub fn record(&self) -> &ExecutionRecord<T, E> {
    &self.record
  }

  pub fn is_cancelled(&self) -> bool {
    self.record.is_cancelled()
  }

  /// Drive the work and wait for its outcome.
  ///
  /// Fails with [`WorkError::Cancelled`] if the work was cancelled before it
  /// started or while it ran, whatever the operation itself produced.
  #[instrument(
    name = "work_execute",
    skip(self),
    fields(work_id = self.id, discipline = ?self.record.discipline())
  )]
  pub async fn execute(&self) -> Result<T, WorkError<E>> {
    if self.record.is_cancelled() {
      return Err(WorkError::Cancelled);
    }

    let invocation = self.record.drive(&self.operation)?;
    let outcome = invocation.await;

    if self.record.is_cancelled() {
      return Err(WorkError::Cancelled);
    }
    outcome
  }

  /// Await the outcome of the work.
  ///
  /// Lazy work returns its remembered outcome and shared work joins the
  /// in-flight invocation; anything else is driven as by
  /// [`execute`](Self::execute).
  pub async fn result(&self) -> Result<T, WorkError<E>> {
    self.execute().await
  }

  /// Drive the work without waiting for it. The outcome is discarded.
  ///
  /// # Panics
  ///
  /// Panics when called outside a tokio runtime.
  pub fn run(&self) {
    if self.record.drive(&self.operation).is_err() {
      debug!(work_id = self.id, "run skipped, work is cancelled");
    }
  }

  /// Cancel the work and every invocation it spawned. Idempotent.
  pub fn cancel(&self) {
    self.record.cancel();
  }

  /// Erase the concrete type.
  pub fn into_boxed(self) -> BoxWork<T, E> {
    Arc::new(self)
  }
}

#[async_trait]
impl<T, E> Work for UnitOfWork<T, E>
where
  T: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  type Output = T;
  type Error = E;

  async fn execute(&self) -> Result<T, WorkError<E>> {
    UnitOfWork::execute(self).await
  }

  fn cancel(&self) {
    UnitOfWork::cancel(self);
  }
}

impl<T, E> OnTerminal for UnitOfWork<T, E>
where
  T: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  /// Fires on the first settled invocation or on cancellation.
  fn on_terminal(&self, hook: TerminalHook) {
    self.record.on_terminal(hook);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_nothing_runs_until_driven() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let work: UnitOfWork<(), ()> = UnitOfWork::from_future_fn(move || {
      let tx = tx.clone();
      async move {
        let _ = tx.send(());
        Ok(())
      }
    });

    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());

    work.execute().await.unwrap();
    assert!(rx.try_recv().is_ok());
  }

  #[tokio::test]
  async fn test_wrappers_get_fresh_records() {
    let work: UnitOfWork<u8, ()> = UnitOfWork::from_future_fn(|| async { Ok(1) });
    let lazy = work.lazy();
    let shared = work.shared();

    assert_eq!(work.discipline(), Discipline::Plain);
    assert_eq!(lazy.discipline(), Discipline::Lazy);
    assert_eq!(shared.discipline(), Discipline::Shared);
    assert_ne!(work.id(), lazy.id());

    lazy.cancel();
    assert!(lazy.is_cancelled());
    assert!(!work.is_cancelled());
    assert!(!shared.is_cancelled());
  }

  #[tokio::test]
  async fn test_clones_share_cancellation() {
    let work: UnitOfWork<u8, ()> = UnitOfWork::from_future_fn(|| async { Ok(1) });
    let clone = work.clone();

    clone.cancel();
    assert_eq!(work.execute().await, Err(WorkError::Cancelled));
  }

  #[test]
  fn test_debug_reports_discipline_and_cancellation() {
    let work: UnitOfWork<u8, ()> = UnitOfWork::from_future_fn(|| async { Ok(1) }).shared();
    work.cancel();

    let rendered = format!("{:?}", work);
    assert!(rendered.contains("discipline: Shared"));
    assert!(rendered.contains("cancelled: true"));
  }

  #[tokio::test]
  async fn test_run_after_cancel_spawns_nothing() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let work: UnitOfWork<(), ()> = UnitOfWork::from_future_fn(move || {
      let tx = tx.clone();
      async move {
        let _ = tx.send(());
        Ok(())
      }
    });

    work.cancel();
    work.run();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(work.record().active_invocations(), 0);
  }
}
