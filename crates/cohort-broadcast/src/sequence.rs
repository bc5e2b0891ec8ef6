//! The broadcast sequence handle.

use std::sync::{Arc, Mutex};

use cohort_core::{OnTerminal, TerminalHook, WorkError, run_hooks};
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::iterator::BroadcastIterator;
use crate::registry::{Registry, SharedRegistry, SlotEnd, lock};

/// One producer, many independent consumers.
///
/// The producer is pulled by a single background task, started by the first
/// consumer pull. Every element is appended to the buffer of each consumer
/// registered at that moment; consumers that register later never see it.
/// When the last consumer goes away the task is stopped.
///
/// Cloning the handle shares the same producer and consumers.
pub struct BroadcastSequence<T, E> {
  registry: SharedRegistry<T, E>,
}

impl<T, E> Clone for BroadcastSequence<T, E> {
  fn clone(&self) -> Self {
    Self {
      registry: self.registry.clone(),
    }
  }
}

impl<T, E> BroadcastSequence<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  /// Wrap a fallible producer without starting it.
  pub fn new<S>(producer: S) -> Self
  where
    S: Stream<Item = Result<T, E>> + Send + 'static,
  {
    Self {
      registry: Arc::new(Mutex::new(Registry::new(producer.boxed()))),
    }
  }

  /// Register a new consumer. Does not start the producer.
  pub fn make_iterator(&self) -> BroadcastIterator<T, E> {
    let id = lock(&self.registry).register();
    BroadcastIterator::new(self.registry.clone(), id)
  }

  /// Stop the producer. Every consumer gets one `Cancelled`, then the end.
  pub fn cancel(&self) {
    let hooks = {
      let mut registry = lock(&self.registry);
      if registry.is_terminal() {
        return;
      }
      registry.abort_drive();
      registry.end_all(SlotEnd::Failure(WorkError::Cancelled))
    };
    debug!("broadcast cancelled");
    run_hooks(hooks);
  }

  pub fn consumer_count(&self) -> usize {
    lock(&self.registry).consumer_count()
  }

  /// Whether the producer drive has been started.
  pub fn is_started(&self) -> bool {
    let registry = lock(&self.registry);
    registry.is_running() || registry.is_terminal()
  }

  pub fn is_terminal(&self) -> bool {
    lock(&self.registry).is_terminal()
  }
}

impl<T, E> OnTerminal for BroadcastSequence<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  /// Fires when the producer finishes, fails or is cancelled, or when the
  /// drive is torn down for lack of consumers.
  fn on_terminal(&self, hook: TerminalHook) {
    let due = lock(&self.registry).on_terminal(hook);
    run_hooks(due);
  }
}

impl<T, E> std::fmt::Debug for BroadcastSequence<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let registry = lock(&self.registry);
    f.debug_struct("BroadcastSequence")
      .field("consumers", &registry.consumer_count())
      .field("running", &registry.is_running())
      .field("terminal", &registry.is_terminal())
      .finish()
  }
}
