//! Cohort Broadcast
//!
//! A [`BroadcastSequence`] shares one producer stream between any number of
//! consumers without running the producer more than once.
//!
//! ```text
//! BroadcastSequence
//! ├── make_iterator() -> BroadcastIterator   (registers a slot, starts nothing)
//! └── cancel()                               (stops the producer for everyone)
//!
//! BroadcastIterator
//! ├── next()   - first pull anywhere starts the drive task
//! └── drop     - removes the slot; the last one out stops the drive task
//! ```
//!
//! Each consumer has its own unbounded buffer. Consumers see the same
//! elements in the same order, starting from the moment they registered.

mod drive;
mod iterator;
mod registry;
mod sequence;

pub use iterator::BroadcastIterator;
pub use sequence::BroadcastSequence;
