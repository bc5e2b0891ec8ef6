//! Cohort Core
//!
//! Building blocks shared by the cohort execution crates:
//!
//! - [`WorkError`], the error every `execute`/`next` returns
//! - [`resumption`], a promise that is resumed exactly once from any context
//! - [`OnTerminal`] and [`TerminalHooks`], used to react to work finishing
//! - [`Work`] and [`Sequence`], the shapes adapters are written against

mod error;
mod hook;
mod resume;
mod shape;

pub use error::WorkError;
pub use hook::{OnTerminal, TerminalHook, TerminalHooks, run_hooks};
pub use resume::{ResumeError, Resumer, SuspendError, Suspension, resumption};
pub use shape::{BoxSequence, BoxWork, Sequence, Work};
