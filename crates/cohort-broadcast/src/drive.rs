//! The single task that pulls the producer.

use std::panic::{AssertUnwindSafe, catch_unwind};

use cohort_core::{WorkError, run_hooks};
use futures::{FutureExt, StreamExt};
use tracing::{debug, instrument, warn};

use crate::registry::{Producer, SlotEnd, WeakRegistry, lock};

/// Pull `producer` to completion, fanning every element out under the
/// registry lock. Ends early when the registry is gone or already terminal.
#[instrument(name = "broadcast_drive", skip_all)]
pub(crate) async fn drive<T, E>(registry: WeakRegistry<T, E>, mut producer: Producer<T, E>)
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  let mut emitted = 0_u64;

  loop {
    let pulled = AssertUnwindSafe(producer.next()).catch_unwind().await;

    let Some(registry) = registry.upgrade() else {
      debug!(emitted, "broadcast dropped, drive exiting");
      return;
    };
    let mut guard = lock(&registry);
    if guard.is_terminal() {
      return;
    }

    let end = match pulled {
      Ok(Some(Ok(element))) => match catch_unwind(AssertUnwindSafe(|| guard.emit(element))) {
        Ok(()) => {
          emitted += 1;
          continue;
        }
        Err(payload) => {
          let error = WorkError::from_panic(payload);
          warn!(emitted, "element clone panicked during fan-out");
          SlotEnd::Failure(error)
        }
      },
      Ok(Some(Err(error))) => {
        debug!(emitted, "producer failed");
        SlotEnd::Failure(WorkError::Operation(error))
      }
      Ok(None) => {
        debug!(emitted, "producer finished");
        SlotEnd::Finished
      }
      Err(payload) => {
        let error = WorkError::from_panic(payload);
        warn!(emitted, "producer panicked");
        SlotEnd::Failure(error)
      }
    };

    // Cloning the failure for each slot can panic too; fall back to a plain
    // finish so no parked consumer is left waiting.
    let hooks = match catch_unwind(AssertUnwindSafe(|| guard.end_all(end))) {
      Ok(hooks) => hooks,
      Err(_) => {
        warn!(emitted, "failure clone panicked during fan-out");
        guard.end_all(SlotEnd::Finished)
      }
    };
    drop(guard);
    run_hooks(hooks);
    return;
  }
}
