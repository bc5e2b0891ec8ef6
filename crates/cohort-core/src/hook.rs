//! Terminal notifications.

/// Callback run once a value reaches a terminal state.
pub type TerminalHook = Box<dyn FnOnce() + Send + 'static>;

/// Values that can tell interested parties when they are done.
///
/// A hook registered after the value is already terminal runs immediately.
pub trait OnTerminal {
  fn on_terminal(&self, hook: TerminalHook);
}

/// Bookkeeping for [`TerminalHook`]s, meant to live inside the owner's lock.
///
/// Neither method runs a hook: both return the hooks that are due so the
/// caller can run them once its lock is released.
#[derive(Default)]
pub struct TerminalHooks {
  pending: Vec<TerminalHook>,
  fired: bool,
}

impl TerminalHooks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store `hook`, or hand it back if the owner is already terminal.
  #[must_use]
  pub fn register(&mut self, hook: TerminalHook) -> Option<TerminalHook> {
    if self.fired {
      Some(hook)
    } else {
      self.pending.push(hook);
      None
    }
  }

  /// Mark the owner terminal and take the stored hooks.
  ///
  /// Returns an empty list on every call after the first.
  #[must_use]
  pub fn fire(&mut self) -> Vec<TerminalHook> {
    self.fired = true;
    std::mem::take(&mut self.pending)
  }

  pub fn is_fired(&self) -> bool {
    self.fired
  }
}

impl std::fmt::Debug for TerminalHooks {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TerminalHooks")
      .field("pending", &self.pending.len())
      .field("fired", &self.fired)
      .finish()
  }
}

/// Run hooks in registration order.
pub fn run_hooks(hooks: impl IntoIterator<Item = TerminalHook>) {
  for hook in hooks {
    hook();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  fn counting_hook(counter: &Arc<AtomicUsize>) -> TerminalHook {
    let counter = counter.clone();
    Box::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    })
  }

  #[test]
  fn test_fire_once() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut hooks = TerminalHooks::new();

    assert!(hooks.register(counting_hook(&counter)).is_none());
    assert!(hooks.register(counting_hook(&counter)).is_none());

    run_hooks(hooks.fire());
    run_hooks(hooks.fire());

    assert!(hooks.is_fired());
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_late_registration_is_returned() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut hooks = TerminalHooks::new();
    run_hooks(hooks.fire());

    let late = hooks.register(counting_hook(&counter));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    run_hooks(late);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }
}
