//! Execution bookkeeping shared by every clone of a unit of work.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use cohort_config::Discipline;
use cohort_core::{TerminalHook, TerminalHooks, WorkError, run_hooks};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) type Outcome<T, E> = Result<T, WorkError<E>>;

/// The closure a unit of work runs on each invocation.
pub(crate) type Operation<T, E> =
  Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// The single invocation lazy and shared work attaches to.
struct Memoized<T, E> {
  generation: u64,
  invocation: Shared<BoxFuture<'static, Outcome<T, E>>>,
  abort: AbortHandle,
}

struct RecordState<T, E> {
  invocations: Vec<AbortHandle>,
  memoized: Option<Memoized<T, E>>,
  generation: u64,
  hooks: TerminalHooks,
}

/// Cancellation state and in-flight invocations of one unit of work.
///
/// All mutation happens under one lock that is never held across an await.
/// Once cancelled, the record refuses to spawn anything new.
pub struct ExecutionRecord<T, E> {
  discipline: Discipline,
  cancel: CancellationToken,
  state: Mutex<RecordState<T, E>>,
}

impl<T, E> ExecutionRecord<T, E> {
  pub(crate) fn new(discipline: Discipline) -> Self {
    Self {
      discipline,
      cancel: CancellationToken::new(),
      state: Mutex::new(RecordState {
        invocations: Vec::new(),
        memoized: None,
        generation: 0,
        hooks: TerminalHooks::new(),
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, RecordState<T, E>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn discipline(&self) -> Discipline {
    self.discipline
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Number of tracked plain invocations that have not finished yet.
  pub fn active_invocations(&self) -> usize {
    self
      .lock()
      .invocations
      .iter()
      .filter(|handle| !handle.is_finished())
      .count()
  }

  /// Whether a lazy/shared invocation is currently memoized.
  pub fn is_memoized(&self) -> bool {
    self.lock().memoized.is_some()
  }
}

impl<T, E> ExecutionRecord<T, E>
where
  T: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  /// Set the cancelled flag and abort everything spawned so far.
  pub(crate) fn cancel(&self) {
    let hooks = {
      let mut state = self.lock();
      if self.cancel.is_cancelled() {
        return;
      }
      self.cancel.cancel();

      for handle in state.invocations.drain(..) {
        handle.abort();
      }
      if let Some(memoized) = &state.memoized {
        memoized.abort.abort();
      }
      state.hooks.fire()
    };

    debug!(discipline = ?self.discipline, "work cancelled");
    run_hooks(hooks);
  }

  /// Spawn or attach to an invocation according to the discipline.
  ///
  /// The returned future resolves to the invocation's outcome; dropping it
  /// does not stop the invocation.
  pub(crate) fn drive(
    self: &Arc<Self>,
    operation: &Operation<T, E>,
  ) -> Result<BoxFuture<'static, Outcome<T, E>>, WorkError<E>> {
    let mut state = self.lock();
    if self.cancel.is_cancelled() {
      return Err(WorkError::Cancelled);
    }

    if let Some(memoized) = &state.memoized {
      debug!(
        discipline = ?self.discipline,
        generation = memoized.generation,
        "attaching to memoized invocation"
      );
      return Ok(memoized.invocation.clone().boxed());
    }

    state.generation += 1;
    let generation = state.generation;
    let handle = tokio::spawn(invoke(
      operation.clone(),
      self.cancel.child_token(),
      Arc::downgrade(self),
      generation,
    ));
    let abort = handle.abort_handle();
    debug!(discipline = ?self.discipline, generation, "spawned invocation");

    match self.discipline {
      Discipline::Plain => {
        state.invocations.retain(|handle| !handle.is_finished());
        state.invocations.push(abort);
        Ok(join(handle).boxed())
      }
      Discipline::Lazy | Discipline::Shared => {
        let invocation = join(handle).boxed().shared();
        state.memoized = Some(Memoized {
          generation,
          invocation: invocation.clone(),
          abort,
        });
        Ok(invocation.boxed())
      }
    }
  }

  /// Called by an invocation once the operation returned.
  fn settle(&self, generation: u64) {
    let hooks = {
      let mut state = self.lock();
      if self.discipline == Discipline::Shared
        && state
          .memoized
          .as_ref()
          .is_some_and(|memoized| memoized.generation == generation)
      {
        state.memoized = None;
      }
      state.hooks.fire()
    };
    run_hooks(hooks);
  }

  pub(crate) fn on_terminal(&self, hook: TerminalHook) {
    let due = self.lock().hooks.register(hook);
    run_hooks(due);
  }
}

async fn invoke<T, E>(
  operation: Operation<T, E>,
  token: CancellationToken,
  record: Weak<ExecutionRecord<T, E>>,
  generation: u64,
) -> Outcome<T, E>
where
  T: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  let outcome = match catch(async move { operation(token).await }).await {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(error)) => Err(WorkError::Operation(error)),
    Err(panicked) => Err(panicked),
  };

  if let Some(record) = record.upgrade() {
    record.settle(generation);
  }
  outcome
}

async fn catch<F, O, E>(future: F) -> Result<O, WorkError<E>>
where
  F: Future<Output = O>,
{
  AssertUnwindSafe(future)
    .catch_unwind()
    .await
    .map_err(WorkError::from_panic)
}

async fn join<T, E>(handle: JoinHandle<Outcome<T, E>>) -> Outcome<T, E> {
  match handle.await {
    Ok(outcome) => outcome,
    Err(err) if err.is_panic() => Err(WorkError::from_panic(err.into_panic())),
    Err(_) => Err(WorkError::Cancelled),
  }
}
