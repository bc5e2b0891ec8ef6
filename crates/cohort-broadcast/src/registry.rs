//! Fan-out registry shared by a broadcast sequence and its iterators.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use cohort_core::{Resumer, TerminalHook, TerminalHooks, WorkError};
use futures::stream::BoxStream;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::drive::drive;

/// What a single pull resolves to.
pub(crate) type Step<T, E> = Result<Option<T>, WorkError<E>>;

pub(crate) type Producer<T, E> = BoxStream<'static, Result<T, E>>;

pub(crate) type SharedRegistry<T, E> = Arc<Mutex<Registry<T, E>>>;

pub(crate) fn lock<T, E>(registry: &Mutex<Registry<T, E>>) -> MutexGuard<'_, Registry<T, E>> {
  registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// NotStarted -> Running -> Terminal, never backwards.
pub(crate) enum IterationStatus<T, E> {
  NotStarted(Producer<T, E>),
  Running(AbortHandle),
  Terminal,
}

#[derive(Debug, Clone)]
pub(crate) enum SlotEnd<E> {
  Finished,
  Failure(WorkError<E>),
}

/// One consumer's private view of the sequence.
pub(crate) struct Slot<T, E> {
  buffer: VecDeque<T>,
  terminal: Option<SlotEnd<E>>,
  pending: Option<Resumer<Step<T, E>>>,
}

impl<T, E> Slot<T, E> {
  fn new(terminal: Option<SlotEnd<E>>) -> Self {
    Self {
      buffer: VecDeque::new(),
      terminal,
      pending: None,
    }
  }

  /// The next thing this consumer should observe, if one is available.
  ///
  /// Buffered elements come before the terminal marker. A failure is handed
  /// out once; afterwards the slot reads as finished.
  pub(crate) fn take_ready(&mut self) -> Option<Step<T, E>> {
    if let Some(element) = self.buffer.pop_front() {
      return Some(Ok(Some(element)));
    }
    match self.terminal.take()? {
      SlotEnd::Finished => {
        self.terminal = Some(SlotEnd::Finished);
        Some(Ok(None))
      }
      SlotEnd::Failure(error) => {
        self.terminal = Some(SlotEnd::Finished);
        Some(Err(error))
      }
    }
  }

  /// Park a pull. A slot holds at most one live pending pull: a second one
  /// is refused and handed back, a detached leftover is replaced.
  #[must_use]
  pub(crate) fn park(&mut self, resumer: Resumer<Step<T, E>>) -> Option<Resumer<Step<T, E>>> {
    if self.pending.as_ref().is_some_and(|pending| !pending.is_detached()) {
      warn!("slot already has a pending pull, refusing another");
      return Some(resumer);
    }
    self.pending = Some(resumer);
    None
  }

  fn deliver(&mut self, element: T) {
    let Some(resumer) = self.pending.take() else {
      self.buffer.push_back(element);
      return;
    };
    // A parked consumer has an empty buffer, so handing the element over
    // directly keeps emission order.
    if let Err(err) = resumer.resume(Ok(Some(element))) {
      if let Ok(Some(element)) = err.into_inner() {
        self.buffer.push_front(element);
      }
    }
  }

  fn end(&mut self, end: SlotEnd<E>) {
    self.terminal = Some(end);
    let Some(resumer) = self.pending.take() else {
      return;
    };
    if let Some(step) = self.take_ready() {
      if let Err(err) = resumer.resume(step) {
        if let Err(error) = err.into_inner() {
          self.terminal = Some(SlotEnd::Failure(error));
        }
      }
    }
  }
}

pub(crate) struct Registry<T, E> {
  status: IterationStatus<T, E>,
  consumers: BTreeMap<u64, Slot<T, E>>,
  next_consumer: u64,
  hooks: TerminalHooks,
}

impl<T, E> Registry<T, E> {
  pub(crate) fn new(producer: Producer<T, E>) -> Self {
    Self {
      status: IterationStatus::NotStarted(producer),
      consumers: BTreeMap::new(),
      next_consumer: 0,
      hooks: TerminalHooks::new(),
    }
  }

  pub(crate) fn is_terminal(&self) -> bool {
    matches!(self.status, IterationStatus::Terminal)
  }

  pub(crate) fn is_running(&self) -> bool {
    matches!(self.status, IterationStatus::Running(_))
  }

  pub(crate) fn consumer_count(&self) -> usize {
    self.consumers.len()
  }

  /// Register a consumer. Nothing emitted before this call is replayed.
  pub(crate) fn register(&mut self) -> u64 {
    let id = self.next_consumer;
    self.next_consumer += 1;

    let terminal = self.is_terminal().then_some(SlotEnd::Finished);
    self.consumers.insert(id, Slot::new(terminal));
    debug!(
      consumer_id = id,
      consumers = self.consumers.len(),
      "consumer registered"
    );
    id
  }

  pub(crate) fn slot_mut(&mut self, id: u64) -> Option<&mut Slot<T, E>> {
    self.consumers.get_mut(&id)
  }

  /// Remove a consumer, tearing the drive down if it was the last one.
  #[must_use]
  pub(crate) fn unregister(&mut self, id: u64) -> Vec<TerminalHook> {
    if self.consumers.remove(&id).is_none() {
      return Vec::new();
    }
    debug!(
      consumer_id = id,
      consumers = self.consumers.len(),
      "consumer removed"
    );

    if !self.consumers.is_empty() || !self.is_running() {
      return Vec::new();
    }
    self.abort_drive();
    self.status = IterationStatus::Terminal;
    debug!("last consumer left, broadcast drive cancelled");
    self.hooks.fire()
  }

  /// Stop the drive task, if one is running. Status is left to the caller.
  pub(crate) fn abort_drive(&self) {
    if let IterationStatus::Running(abort) = &self.status {
      abort.abort();
    }
  }

  #[must_use]
  pub(crate) fn on_terminal(&mut self, hook: TerminalHook) -> Option<TerminalHook> {
    self.hooks.register(hook)
  }
}

impl<T, E> Registry<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  /// Spawn the drive task if nobody has yet.
  pub(crate) fn start(&mut self, shared: &SharedRegistry<T, E>) {
    let status = std::mem::replace(&mut self.status, IterationStatus::Terminal);
    self.status = match status {
      IterationStatus::NotStarted(producer) => {
        let handle = tokio::spawn(drive(Arc::downgrade(shared), producer));
        debug!("broadcast drive started");
        IterationStatus::Running(handle.abort_handle())
      }
      other => other,
    };
  }

  /// Append an element to every live slot, waking parked consumers.
  pub(crate) fn emit(&mut self, element: T) {
    for slot in self.consumers.values_mut() {
      slot.deliver(element.clone());
    }
  }

  /// Move to Terminal and hand every slot the same ending.
  #[must_use]
  pub(crate) fn end_all(&mut self, end: SlotEnd<E>) -> Vec<TerminalHook> {
    self.status = IterationStatus::Terminal;
    for slot in self.consumers.values_mut() {
      slot.end(end.clone());
    }
    self.hooks.fire()
  }
}

pub(crate) type WeakRegistry<T, E> = Weak<Mutex<Registry<T, E>>>;

#[cfg(test)]
mod tests {
  use cohort_core::resumption;

  use super::*;

  #[test]
  fn test_slot_orders_buffer_before_terminal() {
    let mut slot: Slot<u8, String> = Slot::new(None);
    slot.deliver(1);
    slot.deliver(2);
    slot.end(SlotEnd::Failure(WorkError::Operation("boom".to_string())));

    assert_eq!(slot.take_ready(), Some(Ok(Some(1))));
    assert_eq!(slot.take_ready(), Some(Ok(Some(2))));
    assert_eq!(
      slot.take_ready(),
      Some(Err(WorkError::Operation("boom".to_string())))
    );
    assert_eq!(slot.take_ready(), Some(Ok(None)));
    assert_eq!(slot.take_ready(), Some(Ok(None)));
  }

  #[test]
  fn test_slot_without_data_is_not_ready() {
    let mut slot: Slot<u8, String> = Slot::new(None);
    assert_eq!(slot.take_ready(), None);
  }

  #[tokio::test]
  async fn test_parked_slot_is_resumed_directly() {
    let mut slot: Slot<u8, String> = Slot::new(None);
    let (resumer, suspension) = resumption();
    assert!(slot.park(resumer).is_none());

    slot.deliver(9);
    assert!(slot.buffer.is_empty());
    assert_eq!(suspension.await, Ok(Ok(Some(9))));
  }

  #[tokio::test]
  async fn test_parked_slot_receives_failure_once() {
    let mut slot: Slot<u8, String> = Slot::new(None);
    let (resumer, suspension) = resumption();
    assert!(slot.park(resumer).is_none());

    slot.end(SlotEnd::Failure(WorkError::Operation("boom".to_string())));
    assert_eq!(
      suspension.await,
      Ok(Err(WorkError::Operation("boom".to_string())))
    );
    assert_eq!(slot.take_ready(), Some(Ok(None)));
  }

  #[test]
  fn test_detached_resume_keeps_element() {
    let mut slot: Slot<u8, String> = Slot::new(None);
    let (resumer, suspension) = resumption();
    assert!(slot.park(resumer).is_none());
    drop(suspension);

    slot.deliver(4);
    assert_eq!(slot.take_ready(), Some(Ok(Some(4))));
  }

  #[tokio::test]
  async fn test_second_live_pull_is_refused() {
    let mut slot: Slot<u8, String> = Slot::new(None);
    let (first, first_waiting) = resumption();
    let (second, _second_waiting) = resumption();
    assert!(slot.park(first).is_none());

    let refused = slot.park(second).expect("second pull must be refused");
    assert!(!refused.is_resumed());

    slot.deliver(3);
    assert_eq!(first_waiting.await, Ok(Ok(Some(3))));
  }

  #[test]
  fn test_detached_pull_is_replaced() {
    let mut slot: Slot<u8, String> = Slot::new(None);
    let (stale, stale_waiting) = resumption();
    assert!(slot.park(stale).is_none());
    drop(stale_waiting);

    let (fresh, mut fresh_waiting) = resumption();
    assert!(slot.park(fresh).is_none());

    slot.deliver(5);
    assert_eq!(
      futures::FutureExt::now_or_never(&mut fresh_waiting),
      Some(Ok(Ok(Some(5))))
    );
  }
}
