//! Cohort Work
//!
//! [`UnitOfWork`] is a cold, cancellable asynchronous computation. It is
//! built from an operation, does nothing until driven, and can be wrapped so
//! that concurrent drives share one invocation.
//!
//! ```ignore
//! use cohort_work::UnitOfWork;
//!
//! let fetch = UnitOfWork::from_future_fn(|| async { load_profile().await });
//! let once = fetch.lazy();
//!
//! // Both calls observe the same single invocation.
//! let (a, b) = tokio::join!(once.execute(), once.execute());
//! ```

mod record;
mod work;

pub use cohort_config::Discipline;
pub use record::ExecutionRecord;
pub use work::UnitOfWork;
